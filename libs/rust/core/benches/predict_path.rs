use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mlops_core::{Frame, LinearModel, Predictor, Row};
use serde_json::json;

fn frame_and_predict(c: &mut Criterion) {
    let names = ["fixed acidity", "volatile acidity", "citric acid", "residual sugar", "chlorides", "free sulfur dioxide",
        "total sulfur dioxide", "density", "pH", "sulphates", "alcohol"];
    let model = LinearModel {
        feature_names: names.iter().map(|n| n.to_string()).collect(),
        coefficients: vec![0.01; names.len()],
        intercept: 5.0,
        alpha: None,
        l1_ratio: None,
    };
    let row: Row = names.iter().map(|n| (n.to_string(), json!(1.0))).collect();
    let rows = vec![row; 64];
    c.bench_function("frame_and_predict_64_rows", |b| {
        b.iter(|| {
            let frame = Frame::from_rows(black_box(&rows)).unwrap();
            black_box(model.predict(&frame).unwrap())
        })
    });
}

criterion_group!(benches, frame_and_predict);
criterion_main!(benches);
