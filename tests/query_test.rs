// End-to-end query tests against an in-memory shard store: two shards of
// four objects each, run through the local plan runner.

use rakedb::execution::{
    run_sql, CompiledPlan, MapOut, PlanMode, Progress, ProgressCB, QueryPlan, QueryResult,
    SharedValues,
};
use rakedb::kernel::{NdArray, Scalar, Value, Vector};
use rakedb::parser::Select;
use rakedb::safeevent::SafeEvent;
use rakedb::store::memory::{MemoryShard, MemoryStore};
use rakedb::store::ShardStore;
use rakedb::worker::{LocalRunner, MapEngine};
use std::sync::{Arc, Mutex};

fn test_store() -> Arc<MemoryStore> {
    let s1 = MemoryShard::builder()
        .column("object_id", Vector::Int(vec![1, 2, 3, 4]))
        .build();
    let s2 = MemoryShard::builder()
        .column("object_id", Vector::Int(vec![5, 6, 7, 8]))
        .build();
    Arc::new(MemoryStore::new().add_rerun("test", vec![s1, s2]))
}

fn runner(store: Arc<MemoryStore>) -> LocalRunner {
    LocalRunner::new(store, Arc::new(MapEngine::new(Some(2)).unwrap()))
}

async fn query(sql: &str) -> QueryResult {
    let r = runner(test_store());
    run_sql(
        sql,
        &r,
        &SharedValues::new(),
        None,
        &SafeEvent::new(),
        false,
    )
    .await
    .unwrap()
}

fn group_rows(result: &QueryResult) -> Vec<(Value, Vec<Value>)> {
    let groups = match &result.target_list[0] {
        Value::Row(g) => g.clone(),
        other => panic!("missing $group_by column: {:?}", other),
    };
    let mut rows = Vec::new();
    for (i, key) in groups.into_iter().enumerate() {
        let mut row = Vec::new();
        for col in &result.target_list[1..] {
            match col {
                Value::Row(values) => row.push(values[i].clone()),
                other => panic!("bad aggregate column: {:?}", other),
            }
        }
        rows.push((key, row));
    }
    rows.sort_by(|a, b| format!("{:?}", a.0).cmp(&format!("{:?}", b.0)));
    rows
}

#[tokio::test]
async fn count_all() {
    let result = query("SELECT count(*) FROM test").await;
    assert_eq!(result.target_names, vec!["$group_by", "col0"]);
    let rows = group_rows(&result);
    assert_eq!(rows, vec![(Value::Null, vec![Value::int(8)])]);
}

#[tokio::test]
async fn count_grouped() {
    let result = query("SELECT count(*) FROM test GROUP BY object_id % 2").await;
    let rows = group_rows(&result);
    assert_eq!(
        rows,
        vec![
            (
                Value::Row(vec![Value::Scalar(Scalar::Int(0))]),
                vec![Value::int(4)]
            ),
            (
                Value::Row(vec![Value::Scalar(Scalar::Int(1))]),
                vec![Value::int(4)]
            ),
        ]
    );
}

#[tokio::test]
async fn count_filtered_and_grouped() {
    let result =
        query("SELECT count(*) FROM test WHERE object_id % 3 = 0 GROUP BY object_id % 2").await;
    let rows = group_rows(&result);
    // Only 3 and 6 survive the filter.
    assert_eq!(
        rows,
        vec![
            (
                Value::Row(vec![Value::Scalar(Scalar::Int(0))]),
                vec![Value::int(1)]
            ),
            (
                Value::Row(vec![Value::Scalar(Scalar::Int(1))]),
                vec![Value::int(1)]
            ),
        ]
    );
}

#[tokio::test]
async fn target_expression_over_aggregate_result() {
    let result = query("SELECT 2 * count(*) FROM test").await;
    let rows = group_rows(&result);
    assert_eq!(rows, vec![(Value::Null, vec![Value::int(16)])]);
}

#[tokio::test]
async fn order_by_desc_with_limit() {
    let result =
        query("SELECT object_id FROM test WHERE NOT object_id % 2 = 0 ORDER BY object_id DESC LIMIT 3")
            .await;
    assert_eq!(result.target_names, vec!["col0"]);
    assert_eq!(
        result.target_list,
        vec![Value::Array(NdArray::Vector(Vector::Int(vec![7, 5, 3])))]
    );
}

#[tokio::test]
async fn streaming_sleep_cancelled() {
    let r = runner(test_store());
    let interrupt = SafeEvent::new();
    let progress_log: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let log = progress_log.clone();
    let progress: ProgressCB = Arc::new(move |p| log.lock().unwrap().push(p));

    let canceller = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        canceller.set();
    });

    let err = run_sql(
        "SELECT sleep(0.2) FROM test",
        &r,
        &SharedValues::new(),
        Some(progress),
        &interrupt,
        true,
    )
    .await
    .unwrap_err();
    assert!(err.is_user());
    assert_eq!(err.to_string(), "Cancelled");
}

#[tokio::test]
async fn group_key_expression_as_target() {
    let result =
        query("SELECT object_id % 2, count(*) FROM test GROUP BY object_id % 2").await;
    let rows = group_rows(&result);
    assert_eq!(rows.len(), 2);
    for (key, row) in rows {
        let key_value = match key {
            Value::Row(values) => values[0].clone(),
            other => panic!("bad key: {:?}", other),
        };
        // PickOne returns the (unique) group value itself.
        assert_eq!(row[0], key_value);
        assert_eq!(row[1], Value::int(4));
    }
}

#[tokio::test]
async fn sum_and_minmax() {
    let result = query("SELECT sum(object_id), min(object_id), max(object_id) FROM test").await;
    let rows = group_rows(&result);
    assert_eq!(
        rows[0].1,
        vec![Value::int(36), Value::float(1.0), Value::float(8.0)]
    );
}

#[tokio::test]
async fn histogram_with_default_range() {
    let result = query("SELECT histogram(object_id, bins => 4) FROM test").await;
    let rows = group_rows(&result);
    match &rows[0].1[0] {
        Value::Row(items) => {
            // Range comes from the dependent minmax pass: [1, 8].
            assert_eq!(
                items[0],
                Value::Array(NdArray::Vector(Vector::Int(vec![2, 2, 2, 2])))
            );
            match &items[1] {
                Value::Array(NdArray::Vector(Vector::Float(edges))) => {
                    assert_eq!(edges.first(), Some(&1.0));
                    assert_eq!(edges.last(), Some(&8.0));
                    assert_eq!(edges.len(), 5);
                }
                other => panic!("bad edges: {:?}", other),
            }
        }
        other => panic!("bad histogram value: {:?}", other),
    }
}

#[tokio::test]
async fn progress_is_monotonic_and_completes() {
    let r = runner(test_store());
    let progress_log: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let log = progress_log.clone();
    let progress: ProgressCB = Arc::new(move |p| log.lock().unwrap().push(p));
    run_sql(
        "SELECT count(*) FROM test",
        &r,
        &SharedValues::new(),
        Some(progress),
        &SafeEvent::new(),
        false,
    )
    .await
    .unwrap();

    let events = progress_log.lock().unwrap();
    assert!(!events.is_empty());
    let mut last_done = 0;
    for p in events.iter() {
        assert!(p.done <= p.total);
        assert!(p.done >= last_done);
        last_done = p.done;
    }
    let final_p = events.last().unwrap();
    assert_eq!(final_p.done, final_p.total);
}

#[tokio::test]
async fn aggregate_results_are_partition_independent() {
    let one_shard = Arc::new(
        MemoryStore::new().add_rerun(
            "test",
            vec![MemoryShard::builder()
                .column("object_id", Vector::Int(vec![1, 2, 3, 4, 5, 6, 7, 8]))
                .build()],
        ),
    );
    let four_shards = Arc::new(
        MemoryStore::new().add_rerun(
            "test",
            vec![
                MemoryShard::builder()
                    .column("object_id", Vector::Int(vec![1, 2]))
                    .build(),
                MemoryShard::builder()
                    .column("object_id", Vector::Int(vec![3, 4, 5]))
                    .build(),
                MemoryShard::builder()
                    .column("object_id", Vector::Int(vec![6]))
                    .build(),
                MemoryShard::builder()
                    .column("object_id", Vector::Int(vec![7, 8]))
                    .build(),
            ],
        ),
    );
    for sql in [
        "SELECT count(*) FROM test GROUP BY object_id % 2",
        "SELECT sum(object_id) FROM test",
        "SELECT minmax(object_id) FROM test",
        "SELECT histogram(object_id, bins => 3, range => (0, 9)) FROM test",
    ] {
        let a = {
            let r = runner(one_shard.clone());
            run_sql(sql, &r, &SharedValues::new(), None, &SafeEvent::new(), false)
                .await
                .unwrap()
        };
        let b = {
            let r = runner(four_shards.clone());
            run_sql(sql, &r, &SharedValues::new(), None, &SafeEvent::new(), false)
                .await
                .unwrap()
        };
        assert_eq!(group_rows(&a), group_rows(&b), "partition-dependent: {}", sql);
    }
}

#[tokio::test]
async fn sorted_reducer_is_commutative() {
    let store = test_store();
    let select =
        Select::parse("SELECT object_id FROM test ORDER BY object_id DESC LIMIT 3").unwrap();
    let plan = QueryPlan {
        select,
        mode: PlanMode::NonAgg { streaming: false },
    };
    let compiled = CompiledPlan::compile(&plan, SharedValues::new()).unwrap();
    let shards = store.list_shards("test").unwrap();
    let a = compiled.map_shard(shards[0].clone()).unwrap();
    let b = compiled.map_shard(shards[1].clone()).unwrap();
    let ab = compiled.reduce(a.clone(), b.clone()).unwrap();
    let ba = compiled.reduce(b, a).unwrap();
    match (ab, ba) {
        (MapOut::Rows { targets: x, .. }, MapOut::Rows { targets: y, .. }) => {
            assert_eq!(x, y)
        }
        _ => panic!("unexpected partial shape"),
    }
}

#[tokio::test]
async fn unsorted_reducer_is_commutative_up_to_row_order() {
    let store = test_store();
    let select = Select::parse("SELECT object_id FROM test LIMIT 100").unwrap();
    let plan = QueryPlan {
        select,
        mode: PlanMode::NonAgg { streaming: false },
    };
    let compiled = CompiledPlan::compile(&plan, SharedValues::new()).unwrap();
    let shards = store.list_shards("test").unwrap();
    let a = compiled.map_shard(shards[0].clone()).unwrap();
    let b = compiled.map_shard(shards[1].clone()).unwrap();
    let sorted_ids = |out: MapOut| -> Vec<i64> {
        match out {
            MapOut::Rows { targets, .. } => match &targets[0] {
                NdArray::Vector(Vector::Int(v)) => {
                    let mut v = v.clone();
                    v.sort_unstable();
                    v
                }
                other => panic!("bad target: {:?}", other),
            },
            _ => panic!("unexpected partial shape"),
        }
    };
    assert_eq!(
        sorted_ids(compiled.reduce(a.clone(), b.clone()).unwrap()),
        sorted_ids(compiled.reduce(b, a).unwrap())
    );
}

#[tokio::test]
async fn shared_values_reach_the_mapper() {
    let r = runner(test_store());
    let mut shared = SharedValues::new();
    shared.insert("cut".to_string(), Value::int(6));
    let result = run_sql(
        "SELECT count(*) FROM test WHERE object_id > shared.cut",
        &r,
        &shared,
        None,
        &SafeEvent::new(),
        false,
    )
    .await
    .unwrap();
    assert_eq!(
        group_rows(&result),
        vec![(Value::Null, vec![Value::int(2)])]
    );
}

#[tokio::test]
async fn crossmatch_pairs_targets_with_catalog_objects() {
    use rakedb::kernel::Matrix;

    // Three catalog objects on the equator at RA 0, 0.1 and 1.0 radians.
    let coord = Matrix::new(2, 3, vec![0.0, 0.1, 1.0, 0.0, 0.0, 0.0]).unwrap();
    let shard = MemoryShard::builder()
        .matrix("coord", coord)
        .column("object_id", Vector::Int(vec![10, 11, 12]))
        .build();
    let store = Arc::new(MemoryStore::new().add_rerun("sky", vec![shard]));
    let r = runner(store);

    // One target at the origin; chord radius 0.2 catches RA 0 and 0.1.
    let mut shared = SharedValues::new();
    shared.insert(
        "targets".to_string(),
        Value::Array(NdArray::Matrix(Matrix::new(2, 1, vec![0.0, 0.0]).unwrap())),
    );
    let result = run_sql(
        "SELECT crossmatch(coord, shared.targets, 0.2, object_id) FROM sky",
        &r,
        &shared,
        None,
        &SafeEvent::new(),
        false,
    )
    .await
    .unwrap();
    let rows = group_rows(&result);
    match &rows[0].1[0] {
        Value::Row(items) => {
            assert_eq!(
                items[0],
                Value::Array(NdArray::Vector(Vector::Int(vec![0, 0])))
            );
            match &items[1] {
                Value::Row(fields) => {
                    let ids = match &fields[0] {
                        Value::Array(NdArray::Vector(Vector::Int(v))) => {
                            let mut v = v.clone();
                            v.sort_unstable();
                            v
                        }
                        other => panic!("bad field slice: {:?}", other),
                    };
                    assert_eq!(ids, vec![10, 11]);
                }
                other => panic!("bad fields: {:?}", other),
            }
        }
        other => panic!("bad crossmatch value: {:?}", other),
    }
}

#[tokio::test]
async fn nonagg_requires_limit() {
    let r = runner(test_store());
    let err = run_sql(
        "SELECT object_id FROM test",
        &r,
        &SharedValues::new(),
        None,
        &SafeEvent::new(),
        false,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("LIMIT"));
}

#[tokio::test]
async fn unknown_rerun_is_a_user_error() {
    let r = runner(test_store());
    let err = run_sql(
        "SELECT count(*) FROM nope",
        &r,
        &SharedValues::new(),
        None,
        &SafeEvent::new(),
        false,
    )
    .await
    .unwrap_err();
    assert!(err.is_user());
}
