use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::tempdir;
use uqrun_core::{OutputSpec, ParameterKind};
use uqrun_run::{BackendConfig, PollRetry, StudyConfig};

const CLUSTER: &str = r#"
ntrain: 8
seed: 7
sampling: lhs
variables:
  u: {kind: uniform, min: 4.0, max: 6.0}
  v: 0.55
outputs:
  f: []
  field: [2, 3]
template:
  path: template
  param_files: [model.in]
  delimiters: ["<", ">"]
backend:
  kind: cluster
  command: ./model
  queue: short
  cpus: 4
  options:
    time: "00:10:00"
  retry: {policy: fail_fast}
timeout_secs: 30
"#;

#[test]
fn cluster_config_parses_with_defaults() {
    let config = StudyConfig::from_yaml(CLUSTER).expect("config");
    assert_eq!(config.max_in_flight, 4);
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.run_dir, PathBuf::from("run"));
    assert_eq!(config.files.output, PathBuf::from("output.csv"));

    let BackendConfig::Cluster(options) = &config.backend else {
        panic!("expected a cluster backend");
    };
    assert_eq!(options.job_name, "uqrun");
    assert_eq!(options.queue.as_deref(), Some("short"));
    assert_eq!(options.cpus, Some(4));
    assert_eq!(options.retry, PollRetry::FailFast);

    let template = config.template.as_ref().expect("template");
    assert_eq!(template.options.param_files, Some(vec!["model.in".to_string()]));
    assert_eq!(
        template.options.delimiters,
        ("<".to_string(), ">".to_string())
    );

    let schema = config.parameter_schema().expect("schema");
    let kinds: Vec<_> = schema.iter().map(|spec| (spec.name.as_str(), spec.kind)).collect();
    assert_eq!(kinds, vec![("u", ParameterKind::Float), ("v", ParameterKind::Float)]);
    assert_eq!(
        config.output_schema().outputs(),
        &[OutputSpec::scalar("f"), OutputSpec::shaped("field", vec![2, 3])]
    );
}

#[test]
fn load_resolves_paths_against_the_config_directory() {
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("studies");
    fs::create_dir_all(&nested).expect("dir");
    let path = nested.join("study.yaml");
    fs::write(&path, CLUSTER).expect("write");

    let config = StudyConfig::load(&path).expect("load");
    assert_eq!(config.base_dir, nested);
    assert_eq!(config.run_root(), nested.join("run"));
    assert_eq!(config.input_path(), nested.join("input.csv"));
    assert_eq!(config.template_dir(), Some(nested.join("template")));
    assert_eq!(config.resolve(&dir.path().join("abs")), dir.path().join("abs"));
}

fn config_error(yaml: &str) -> String {
    StudyConfig::from_yaml(yaml).expect_err("invalid config").info().code.clone()
}

#[test]
fn invalid_configs_are_rejected_with_codes() {
    let base = "variables: {x: 1.0}\nntrain: 2\n";
    assert_eq!(
        config_error(&format!("{base}outputs: {{}}\nbackend: {{kind: direct}}\n")),
        "config.no_outputs"
    );
    assert_eq!(
        config_error(&format!(
            "{base}outputs: {{y: []}}\nmax_in_flight: 0\nbackend: {{kind: direct}}\n"
        )),
        "config.max_in_flight"
    );
    assert_eq!(
        config_error(&format!("{base}outputs: {{y: []}}\nbackend: {{kind: local, command: []}}\n")),
        "config.backend"
    );
    assert_eq!(
        config_error(&format!(
            "{base}outputs: {{y: []}}\nbackend: {{kind: local, command: [./model]}}\n"
        )),
        "config.template_required"
    );
    assert_eq!(
        config_error("variables: {x: 1.0}\noutputs: {y: []}\nbackend: {kind: direct}\n"),
        "config.ntrain"
    );
    assert_eq!(config_error("outputs: [\n"), "config.parse");
}

#[test]
fn direct_backend_defaults_to_the_mockup_model() {
    let config = StudyConfig::from_yaml(
        "ntrain: 1\nvariables: {u: 5.0}\noutputs: {f: []}\nbackend: {kind: direct}\n",
    )
    .expect("config");
    assert_eq!(
        config.backend,
        BackendConfig::Direct {
            model: "mockup".to_string()
        }
    );
    assert!(config.template.is_none());
    assert_eq!(config.extractor.name, "json");
}
