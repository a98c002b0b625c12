//! Scheduled agents saturating a tenant's knowledge

use mindspace::{CognitiveRuntime, CoreConfig};
use std::time::Duration;

/// A chain A1 -> A2 -> ... -> A11 closes transitively under the scheduled
/// MindAgent: the atom count grows until every derivable link exists,
/// then stabilizes.
#[tokio::test]
async fn mind_agent_ticks_saturate_transitive_closure() {
    let runtime = CognitiveRuntime::new(CoreConfig {
        num_shards: 4,
        workers_per_shard: 2,
        inference_workers: 4,
        agent_workers: 2,
        queue_capacity: 256,
        agent_tick_ms: 50,
        ..Default::default()
    })
    .unwrap();
    runtime.initialize_tenant("demo").await.unwrap();

    let mut concepts = Vec::new();
    for i in 1..=11 {
        concepts.push(
            runtime
                .create_concept_node(&format!("A{}", i), "demo")
                .await
                .unwrap(),
        );
    }
    for pair in concepts.windows(2) {
        runtime
            .create_inheritance_link(&pair[0].id, &pair[1].id, "demo")
            .await
            .unwrap();
    }

    // 11 concepts plus the full closure over an 11-node chain.
    let expected = 11 + (11 * 10) / 2;

    let mut count = 0;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        count = runtime.query_atoms("demo", None).await.unwrap().len();
        if count == expected {
            break;
        }
        assert!(count <= expected, "closure must not overshoot");
    }
    assert_eq!(count, expected);

    // Saturated: further ticks add nothing.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(runtime.query_atoms("demo", None).await.unwrap().len(), expected);

    let agent = runtime.get_agent("mind-demo").unwrap();
    assert!(agent.stats().run_count >= 1);

    runtime.close();
}
