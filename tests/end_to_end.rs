use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

use allreduce::Coordinator;
use learner::{
    ExampleSource, Fetch, GdConfig, ReductionConfig, ReductionKind,
    example::CONSTANT_NAMESPACE,
    reductions::{LdfAlgorithm, LdfLayout},
};
use online_reductions::{ClusterConfig, JsonLinesSource, RunConfig, source_config, train};
use regressor::read_model;
use tokio::{net::TcpListener, runtime::Runtime};
use tokio_test::assert_ok;

/// A fresh directory for one test's files.
fn workdir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("online-reductions-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_lines(path: &Path, lines: &[String]) {
    fs::write(path, lines.join("\n") + "\n").unwrap();
}

fn regression_lines(n: usize) -> Vec<String> {
    (0..n)
        .map(|_| r#"{"label": 0.75, "features": {"a": [[3, 1.0]]}}"#.to_string())
        .collect()
}

fn gd(num_bits: u32) -> GdConfig {
    GdConfig {
        num_bits: Some(num_bits),
        ..Default::default()
    }
}

#[test]
fn trained_model_predicts_after_reload() {
    let dir = workdir("reload");
    let data = dir.join("train.jsonl");
    write_lines(&data, &regression_lines(200));

    let config = RunConfig {
        gd: gd(12),
        data: data.clone(),
        predictions: Some(dir.join("train.pred")),
        final_model: Some(dir.join("model")),
        readable_model: Some(dir.join("model.txt")),
        ..Default::default()
    };
    let stats = assert_ok!(train(&config));
    assert_eq!(stats.example_number, 200);

    let predictions = fs::read_to_string(dir.join("train.pred")).unwrap();
    assert_eq!(predictions.lines().count(), 200);

    let model = assert_ok!(read_model(&dir.join("model")));
    assert_eq!(model.header.num_bits, 12);
    assert!(!model.records.is_empty());
    assert!(
        fs::read_to_string(dir.join("model.txt"))
            .unwrap()
            .starts_with("Version 6.1.3\n")
    );

    let test = dir.join("test.jsonl");
    write_lines(&test, &[r#"{"features": {"a": [[3, 1.0]]}}"#.to_string()]);
    let reload = RunConfig {
        gd: GdConfig {
            training: false,
            ..Default::default()
        },
        data: test,
        predictions: Some(dir.join("test.pred")),
        initial_model: Some(dir.join("model")),
        ..Default::default()
    };
    assert_ok!(train(&reload));

    let prediction: f32 = fs::read_to_string(dir.join("test.pred"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!((prediction - 0.75).abs() < 0.1, "predicted {prediction}");
}

#[test]
fn configured_bits_must_match_the_initial_model() {
    let dir = workdir("bits");
    let data = dir.join("train.jsonl");
    write_lines(&data, &regression_lines(5));

    let config = RunConfig {
        gd: gd(12),
        data: data.clone(),
        final_model: Some(dir.join("model")),
        ..Default::default()
    };
    assert_ok!(train(&config));

    let mismatched = RunConfig {
        gd: gd(10),
        data,
        initial_model: Some(dir.join("model")),
        ..Default::default()
    };
    assert!(train(&mismatched).is_err());
}

#[test]
fn multiline_predictions_are_grouped_by_blank_lines() {
    let dir = workdir("ldf");
    let data = dir.join("train.jsonl");

    let mut lines = Vec::new();
    for i in 0..60 {
        let (first, second) = if i % 2 == 0 { (10, 20) } else { (20, 10) };
        let cost = |index| if index == 10 { 0 } else { 1 };
        lines.push(r#"{"costs": [[0, -1]], "features": {"s": [[5, 1.0]]}}"#.to_string());
        lines.push(format!(
            r#"{{"costs": [[1, {}]], "features": {{"a": [[{first}, 1.0]]}}}}"#,
            cost(first)
        ));
        lines.push(format!(
            r#"{{"costs": [[2, {}]], "features": {{"a": [[{second}, 1.0]]}}}}"#,
            cost(second)
        ));
        lines.push(String::new());
    }
    write_lines(&data, &lines);

    let config = RunConfig {
        gd: gd(14),
        reduction: ReductionConfig {
            strategy: ReductionKind::Ldf {
                layout: LdfLayout::Multiline,
                algorithm: LdfAlgorithm::Oaa,
            },
            ..Default::default()
        },
        data,
        predictions: Some(dir.join("pred")),
        ..Default::default()
    };
    let stats = assert_ok!(train(&config));
    assert_eq!(stats.example_number, 60);

    let predictions = fs::read_to_string(dir.join("pred")).unwrap();
    let groups: Vec<&str> = predictions.split("\n\n").filter(|g| !g.trim().is_empty()).collect();
    assert_eq!(groups.len(), 60);
}

#[test]
fn label_dependent_features_carry_no_constant() {
    let dir = workdir("ldf-constant");
    let data = dir.join("train.jsonl");
    write_lines(
        &data,
        &[
            r#"{"costs": [[1, 0]], "features": {"a": [[10, 1.0]]}}"#.to_string(),
            r#"{"costs": [[2, 1]], "features": {"a": [[20, 1.0]]}}"#.to_string(),
            String::new(),
        ],
    );

    let config = RunConfig {
        gd: gd(10),
        reduction: ReductionConfig {
            strategy: ReductionKind::Ldf {
                layout: LdfLayout::Multiline,
                algorithm: LdfAlgorithm::Oaa,
            },
            ..Default::default()
        },
        data,
        add_constant: true,
        ..Default::default()
    };
    let source = source_config(&config);
    assert!(!source.add_constant);

    let mut source = assert_ok!(JsonLinesSource::spawn(source));
    let mut seen = 0;
    loop {
        match source.next_example() {
            Fetch::Ready(ec) => {
                assert!(!ec.is_active(CONSTANT_NAMESPACE));
                seen += 1;
            }
            Fetch::Pending => thread::yield_now(),
            Fetch::Done => break,
        }
    }
    assert_eq!(seen, 3);
    assert_eq!(assert_ok!(source.finish()), 3);

    assert_ok!(train(&config));
}

#[test]
fn two_nodes_end_with_the_same_model() {
    let dir = workdir("cluster");
    let runtime = Runtime::new().unwrap();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let coordinator_addr = listener.local_addr().unwrap();

    let coordinator = thread::spawn(move || {
        runtime.block_on(async move { Coordinator::new(2)?.serve(listener).await })
    });

    let nodes: Vec<_> = (0..2)
        .map(|node_id| {
            let data = dir.join(format!("node{node_id}.jsonl"));
            let label = if node_id == 0 { 0.25 } else { 0.75 };
            let lines: Vec<String> = (0..50)
                .map(|_| format!(r#"{{"label": {label}, "features": {{"a": [[3, 1.0]]}}}}"#))
                .collect();
            write_lines(&data, &lines);

            let config = RunConfig {
                gd: gd(10),
                data,
                passes: 2,
                final_model: Some(dir.join(format!("node{node_id}.model"))),
                cluster: Some(ClusterConfig {
                    coordinator: coordinator_addr,
                    node_id,
                    nodes: 2,
                }),
                ..Default::default()
            };
            thread::spawn(move || train(&config).map(|stats| stats.example_number))
        })
        .collect();

    for node in nodes {
        assert_eq!(node.join().unwrap().unwrap(), 100);
    }
    coordinator.join().unwrap().unwrap();

    let first = read_model(&dir.join("node0.model")).unwrap();
    let second = read_model(&dir.join("node1.model")).unwrap();
    assert_eq!(first.records, second.records);
}
