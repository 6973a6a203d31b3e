use indexmap::IndexMap;
use uqrun_core::{
    OutputMap, OutputSchema, OutputSpec, OutputValue, ParameterPoint, ParameterSpec, Scalar,
    UqError,
};
use uqrun_store::{FailureKind, ResultRow, ResultTable};

fn table() -> ResultTable {
    ResultTable::new(
        vec![ParameterSpec::float("u"), ParameterSpec::int("n")],
        OutputSchema::new(vec![OutputSpec::scalar("f"), OutputSpec::shaped("g", vec![2])]),
    )
}

fn point(index: usize, u: f64, n: i64) -> ParameterPoint {
    let mut values = IndexMap::new();
    values.insert("u".to_string(), Scalar::Float(u));
    values.insert("n".to_string(), Scalar::Int(n));
    ParameterPoint::new(index, values)
}

fn outputs(f: f64, g: [f64; 2]) -> OutputMap {
    let mut map = OutputMap::new();
    map.insert("g".to_string(), OutputValue::Array(g.to_vec()));
    map.insert("f".to_string(), OutputValue::Scalar(f));
    map
}

#[test]
fn rows_are_write_once() {
    let mut table = table();
    table
        .insert(ResultRow::succeeded(&point(0, 0.5, 1), outputs(1.0, [2.0, 3.0])))
        .expect("first row");
    let err = table
        .insert(ResultRow::failed(&point(0, 0.5, 1), FailureKind::Run, "again"))
        .expect_err("duplicate");
    assert!(matches!(err, UqError::Store(ref info) if info.code == "store.duplicate_row"));
    assert_eq!(table.len(), 1);
}

#[test]
fn succeeded_outputs_follow_schema_order() {
    let mut table = table();
    table
        .insert(ResultRow::succeeded(&point(3, 0.5, 1), outputs(1.0, [2.0, 3.0])))
        .expect("row");
    let row = table.get(3).expect("stored");
    let names: Vec<&str> = row
        .outputs
        .as_ref()
        .expect("outputs")
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(names, vec!["f", "g"]);
}

#[test]
fn shape_mismatch_is_rejected() {
    let mut table = table();
    let mut bad = outputs(1.0, [2.0, 3.0]);
    bad.insert("g".to_string(), OutputValue::Array(vec![1.0]));
    let err = table
        .insert(ResultRow::succeeded(&point(0, 0.5, 1), bad))
        .expect_err("shape");
    assert!(matches!(err, UqError::Store(_)));
    assert!(table.is_empty());
}

#[test]
fn failed_rows_keep_inputs_and_drop_outputs() {
    let mut table = table();
    table
        .insert(ResultRow::failed(&point(1, 0.25, 4), FailureKind::Collection, "missing f"))
        .expect("failed row");
    let row = table.get(1).expect("stored");
    assert_eq!(row.inputs.get("n"), Some(&Scalar::Int(4)));
    assert!(row.outputs.is_none());
    assert_eq!(row.failure_kind(), Some(FailureKind::Collection));
}

#[test]
fn input_kind_mismatch_is_rejected() {
    let mut table = table();
    let mut values = IndexMap::new();
    values.insert("u".to_string(), Scalar::Float(0.1));
    values.insert("n".to_string(), Scalar::Float(2.0));
    let err = table
        .insert(ResultRow::failed(&ParameterPoint::new(0, values), FailureKind::Run, "x"))
        .expect_err("kind");
    assert_eq!(err.info().code, "store.input_columns");
}

#[test]
fn tally_and_training_data_cover_terminal_rows() {
    let mut table = table();
    table
        .insert(ResultRow::succeeded(&point(2, 0.75, 3), outputs(5.0, [6.0, 7.0])))
        .expect("row 2");
    table
        .insert(ResultRow::failed(&point(1, 0.5, 2), FailureKind::Run, "exit 1"))
        .expect("row 1");
    table
        .insert(ResultRow::succeeded(&point(0, 0.25, 1), outputs(1.0, [2.0, 3.0])))
        .expect("row 0");

    let tally = table.tally();
    assert_eq!(tally.succeeded, 2);
    assert_eq!(tally.failed, 1);
    assert_eq!(tally.failures, vec![(1, FailureKind::Run)]);
    assert_eq!(tally.total(), 3);
    assert_eq!(table.terminal_indices().into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);

    let data = table.training_data().expect("training data");
    assert_eq!(data.indices, vec![0, 2]);
    assert_eq!(data.x, vec![vec![0.25, 1.0], vec![0.75, 3.0]]);
    assert_eq!(data.y, vec![vec![1.0, 2.0, 3.0], vec![5.0, 6.0, 7.0]]);
}

#[test]
fn categorical_inputs_have_no_training_view() {
    let mut table = ResultTable::new(
        vec![ParameterSpec::text("mode")],
        OutputSchema::new(vec![OutputSpec::scalar("f")]),
    );
    let mut values = IndexMap::new();
    values.insert("mode".to_string(), Scalar::Text("fast".into()));
    let mut out = OutputMap::new();
    out.insert("f".to_string(), OutputValue::Scalar(1.0));
    table
        .insert(ResultRow::succeeded(&ParameterPoint::new(0, values), out))
        .expect("row");
    let err = table.training_data().expect_err("categorical");
    assert_eq!(err.info().code, "store.training_text");
}
