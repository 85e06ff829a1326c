use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replica_common::ReplicaError;
use replica_vector::{
    DenseSnapshotBuilder, IndexScheduler, Ranker, SearchQuery, VectorStore,
};
use replica_vector::{JsonSignatureExtractor, Matcher};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn remove_keeps_neighbours_and_ranks_by_similarity() {
    let store = VectorStore::new(2).unwrap();
    store.insert("A", vec![1.0, 0.0], json!({"name": "A"})).await.unwrap();
    store.insert("B", vec![0.0, 1.0], json!({"name": "B"})).await.unwrap();
    store.insert("C", vec![0.9, 0.1], json!({"name": "C"})).await.unwrap();
    store.insert("FAR", vec![-6.0, 8.0], json!({"name": "FAR"})).await.unwrap();

    store.remove("B").await.unwrap();
    assert!(matches!(store.lookup("B").await, Err(ReplicaError::NotFound(_))));
    assert_eq!(
        store.lookup("C").await.unwrap(),
        (vec![0.9, 0.1], json!({"name": "C"}))
    );

    let space = store.snapshot_vectors().await.unwrap();
    let scores = Ranker::default()
        .score_positive_only(&["A".to_string()], space.keys(), space.vectors())
        .unwrap();
    assert!(scores.get("C").unwrap() > scores.get("FAR").unwrap());

    let ranked: Vec<String> = scores.top_k(3).into_iter().map(|s| s.key).collect();
    assert_eq!(ranked, vec!["A", "C", "FAR"]);
}

#[tokio::test]
async fn random_removals_never_corrupt_other_entries() {
    let store = VectorStore::new(3).unwrap();
    let mut expected: HashMap<String, Vec<f32>> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(11);

    for i in 0..200 {
        let key = format!("img-{}", i);
        let vector: Vec<f32> = (0..3).map(|_| rng.gen_range(0.0..100.0)).collect();
        store.insert(key.clone(), vector.clone(), json!({"i": i})).await.unwrap();
        expected.insert(key, vector);
    }

    for _ in 0..120 {
        let keys = store.keys().await;
        let victim = keys[rng.gen_range(0..keys.len())].clone();
        store.remove(&victim).await.unwrap();
        expected.remove(&victim);
    }

    assert_eq!(store.len().await, expected.len());
    for (key, vector) in &expected {
        let (stored, metadata) = store.lookup(key).await.unwrap();
        assert_eq!(&stored, vector);
        assert_eq!(metadata["i"], json!(key[4..].parse::<u64>().unwrap()));
    }
}

#[tokio::test]
async fn binary_ranking_scores_every_item() {
    let store = Arc::new(VectorStore::new(4).unwrap());
    let mut rng = StdRng::seed_from_u64(5);
    for i in 0..10 {
        let vector: Vec<f32> = (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect();
        store.insert(format!("k{}", i), vector, json!(null)).await.unwrap();
    }

    let scheduler = IndexScheduler::new(
        Arc::clone(&store),
        Arc::new(DenseSnapshotBuilder),
        Ranker::default(),
        Duration::from_secs(60),
    );
    scheduler.run_cycle().await;

    let positive: Vec<String> = ["k0", "k1", "k2"].iter().map(|s| s.to_string()).collect();
    let negative: Vec<String> = ["k3", "k4"].iter().map(|s| s.to_string()).collect();
    let hits = scheduler.search(&positive, &negative, 100).await.unwrap();

    assert_eq!(hits.len(), 10);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // identical queries give identical rankings
    let again = scheduler.search(&positive, &negative, 100).await.unwrap();
    assert_eq!(hits, again);
}

#[tokio::test]
async fn matcher_round_trip() {
    let config = replica_common::AppConfig {
        dimension: 2,
        feature_name: "fc7".to_string(),
        ..Default::default()
    };
    let matcher = Matcher::new(&config, Arc::new(JsonSignatureExtractor::new(["fc7"]))).unwrap();

    matcher
        .add_image("A", br#"{"fc7": [1.0, 0.0]}"#, json!({"title": "Mona Lisa"}))
        .await
        .unwrap();
    matcher.add_vector("B", vec![0.0, 1.0], json!(null)).await.unwrap();
    matcher.add_vector("C", vec![0.9, 0.1], json!(null)).await.unwrap();
    matcher.scheduler().run_cycle().await;

    matcher
        .update_metadata("A", json!({"title": "La Gioconda"}))
        .await
        .unwrap();
    matcher.remove("B").await.unwrap();
    assert!(matches!(matcher.get("B").await, Err(ReplicaError::NotFound(_))));

    let results = matcher.search(&SearchQuery::positive(["A"])).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].key, "A");
    assert_eq!(results[0].metadata, json!({"title": "La Gioconda"}));
    assert_eq!(results[1].key, "C");

    matcher.scheduler().run_cycle().await;
    assert!(!matcher.scheduler().is_dirty().await);
    assert_eq!(matcher.scheduler().current_snapshot().await.unwrap().len(), 2);
}
