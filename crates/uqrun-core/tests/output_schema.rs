use uqrun_core::{OutputMap, OutputSchema, OutputSpec, OutputValue};

fn schema() -> OutputSchema {
    OutputSchema::new(vec![
        OutputSpec::scalar("f"),
        OutputSpec::shaped("g", vec![2, 2]),
    ])
}

#[test]
fn conform_reorders_to_schema() {
    let mut map = OutputMap::new();
    map.insert("g".into(), OutputValue::Array(vec![1.0, 2.0, 3.0, 4.0]));
    map.insert("f".into(), OutputValue::Scalar(0.5));
    let ordered = schema().conform(map).expect("conform");
    let names: Vec<_> = ordered.keys().cloned().collect();
    assert_eq!(names, vec!["f".to_string(), "g".to_string()]);
}

#[test]
fn shape_mismatch_is_collection_error() {
    let mut map = OutputMap::new();
    map.insert("f".into(), OutputValue::Scalar(0.5));
    map.insert("g".into(), OutputValue::Array(vec![1.0, 2.0, 3.0]));
    let err = schema().conform(map).expect_err("shape");
    assert_eq!(err.info().code, "output.shape");
}

#[test]
fn missing_and_undeclared_outputs_fail() {
    let mut map = OutputMap::new();
    map.insert("f".into(), OutputValue::Scalar(0.5));
    assert_eq!(
        schema().conform(map.clone()).expect_err("missing").info().code,
        "output.missing"
    );
    map.insert("g".into(), OutputValue::Array(vec![0.0; 4]));
    map.insert("h".into(), OutputValue::Scalar(1.0));
    assert_eq!(
        schema().conform(map).expect_err("undeclared").info().code,
        "output.undeclared"
    );
}

#[test]
fn single_element_array_matches_scalar_shape() {
    let schema = OutputSchema::new(vec![OutputSpec::shaped("f", vec![1])]);
    let mut map = OutputMap::new();
    map.insert("f".into(), OutputValue::Scalar(2.0));
    assert!(schema.conform(map).is_ok());
}
