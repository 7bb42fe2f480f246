use samediff::graph::{Graph, GraphError};
use samediff::tensor::{DType, NdArray, Shape};
use samediff::train::{TrainingConfig, UpdaterConfig};

fn simple_graph() -> Graph {
    let mut g = Graph::new("simple");
    g.placeholder("x", DType::F32, Shape::new(vec![2, 2])).unwrap();
    g.constant("c", NdArray::full(Shape::new(vec![2, 2]), DType::F32, 2.0))
        .unwrap();
    g.mul("y", "x", "c").unwrap();
    g
}

#[test]
fn duplicate_variable_names_are_rejected() {
    let mut g = Graph::new("dup");
    g.placeholder("x", DType::F32, Shape::new(vec![2])).unwrap();
    let err = g.placeholder("x", DType::F32, Shape::new(vec![2])).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateVariable(_)));
}

#[test]
fn op_output_conflicts_with_existing_variable() {
    let mut g = Graph::new("conflict");
    g.placeholder("x", DType::F32, Shape::new(vec![2])).unwrap();
    g.placeholder("y", DType::F32, Shape::new(vec![2])).unwrap();
    let err = g.add("y", "x", "x").unwrap_err();
    assert!(matches!(err, GraphError::DuplicateVariable(_)));
}

#[test]
fn unknown_input_is_rejected() {
    let mut g = Graph::new("unknown");
    g.placeholder("x", DType::F32, Shape::new(vec![2])).unwrap();
    let err = g.add("y", "x", "nope").unwrap_err();
    assert!(matches!(err, GraphError::UnknownVariable { .. }));
}

#[test]
fn elementwise_shape_inference() {
    let mut g = Graph::new("infer");
    g.placeholder("a", DType::F32, Shape::new(vec![2, 3])).unwrap();
    g.placeholder("b", DType::F32, Shape::new(vec![2, 3])).unwrap();
    g.placeholder("s", DType::F32, Shape::scalar()).unwrap();
    g.add("sum", "a", "b").unwrap();
    g.mul("scaled", "a", "s").unwrap();
    assert_eq!(g.variable("sum").unwrap().shape.dims(), &[2, 3]);
    assert_eq!(g.variable("scaled").unwrap().shape.dims(), &[2, 3]);
}

#[test]
fn incompatible_shapes_fail_inference() {
    let mut g = Graph::new("bad");
    g.placeholder("a", DType::F32, Shape::new(vec![2, 3])).unwrap();
    g.placeholder("b", DType::F32, Shape::new(vec![3, 2])).unwrap();
    let err = g.add("sum", "a", "b").unwrap_err();
    assert!(matches!(err, GraphError::InferenceShape { .. }));
}

#[test]
fn mixed_dtypes_fail_inference() {
    let mut g = Graph::new("bad");
    g.placeholder("a", DType::F32, Shape::new(vec![2])).unwrap();
    g.placeholder("b", DType::F64, Shape::new(vec![2])).unwrap();
    let err = g.add("sum", "a", "b").unwrap_err();
    assert!(matches!(err, GraphError::InferenceDType { .. }));
}

#[test]
fn matmul_inference_checks_contraction() {
    let mut g = Graph::new("mm");
    g.placeholder("a", DType::F32, Shape::new(vec![2, 3])).unwrap();
    g.placeholder("b", DType::F32, Shape::new(vec![3, 4])).unwrap();
    g.matmul("ab", "a", "b").unwrap();
    assert_eq!(g.variable("ab").unwrap().shape.dims(), &[2, 4]);

    let err = g.matmul("ba", "b", "a").unwrap_err();
    assert!(matches!(err, GraphError::InferenceShape { .. }));
}

#[test]
fn comparisons_produce_bool() {
    let mut g = Graph::new("cmp");
    g.placeholder("a", DType::F32, Shape::new(vec![4])).unwrap();
    g.placeholder("b", DType::F32, Shape::new(vec![4])).unwrap();
    g.less("lt", "a", "b").unwrap();
    assert_eq!(g.variable("lt").unwrap().dtype, DType::Bool);
}

#[test]
fn switch_requires_bool_scalar_predicate() {
    let mut g = Graph::new("sw");
    g.placeholder("data", DType::F32, Shape::new(vec![2])).unwrap();
    g.placeholder("pred", DType::F32, Shape::scalar()).unwrap();
    let err = g.switch("s", "data", "pred").unwrap_err();
    assert!(matches!(err, GraphError::InferenceShape { .. }));
}

#[test]
fn switch_produces_two_outputs() {
    let mut g = Graph::new("sw");
    g.placeholder("data", DType::F32, Shape::new(vec![2])).unwrap();
    g.placeholder("pred", DType::Bool, Shape::scalar()).unwrap();
    let (f, t) = g.switch("s", "data", "pred").unwrap();
    assert_eq!(f, "s:0");
    assert_eq!(t, "s:1");
    assert_eq!(g.variable("s:0").unwrap().shape.dims(), &[2]);
    assert_eq!(g.variable("s:1").unwrap().shape.dims(), &[2]);
}

#[test]
fn merge_allows_forward_reference_until_validate() {
    let mut g = Graph::new("loop");
    g.placeholder("x", DType::F32, Shape::scalar()).unwrap();
    g.enter("enter_x", "body", "x").unwrap();
    // "next" does not exist yet; only Merge may do this.
    g.merge("m", "enter_x", "next").unwrap();
    assert!(g.validate().is_err());
    g.next_iteration("next", "m").unwrap();
    g.validate().unwrap();
}

#[test]
fn non_merge_forward_reference_fails_immediately() {
    let mut g = Graph::new("loop");
    g.placeholder("x", DType::F32, Shape::scalar()).unwrap();
    let err = g.add("y", "x", "later").unwrap_err();
    assert!(matches!(err, GraphError::UnknownVariable { .. }));
}

#[test]
fn graph_def_json_roundtrip() -> anyhow::Result<()> {
    let mut g = simple_graph();
    g.set_training_config(TrainingConfig::new(UpdaterConfig::adam(0.001), "y"));

    let def = g.to_def();
    let json = serde_json::to_string(&def)?;
    let parsed = serde_json::from_str(&json)?;
    let restored = Graph::from_def(&parsed)?;

    assert_eq!(restored.name(), "simple");
    let c = restored.variable("c").unwrap();
    let array = c.array.as_ref().unwrap();
    assert!(array.all_close(&NdArray::full(Shape::new(vec![2, 2]), DType::F32, 2.0), 0.0));
    let y = restored.variable("y").unwrap();
    assert_eq!(y.producer.as_deref(), Some("y"));
    assert!(restored.training_config().is_some());
    Ok(())
}

#[test]
fn graph_file_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let g = simple_graph();

    let json_path = dir.path().join("graph.json");
    g.save_json(&json_path)?;
    let restored = Graph::load_json(&json_path)?;
    assert_eq!(restored.ops().count(), 1);

    // The binary decoder must handle data-less variables (placeholder and
    // op output) interleaved with a constant that carries bytes.
    let bin_path = dir.path().join("graph.bin");
    g.save_bin(&bin_path)?;
    let restored = Graph::load_bin(&bin_path)?;
    assert_eq!(restored.variable("y").unwrap().shape.dims(), &[2, 2]);
    assert!(restored.variable("x").unwrap().array.is_none());
    let c = restored.variable("c").unwrap().array.as_ref().unwrap();
    assert!(c.all_close(&NdArray::full(Shape::new(vec![2, 2]), DType::F32, 2.0), 0.0));
    Ok(())
}

#[test]
fn gradients_require_scalar_loss() {
    let mut g = Graph::new("grad");
    g.var("w", NdArray::full(Shape::new(vec![2]), DType::F64, 1.0)).unwrap();
    g.square("sq", "w").unwrap();
    let err = g.calculate_gradients("sq", &["w"]).unwrap_err();
    assert!(matches!(err, GraphError::NotScalarLoss(_)));
}

#[test]
fn gradients_are_named_ops_in_the_graph() {
    let mut g = Graph::new("grad");
    g.var("w", NdArray::full(Shape::new(vec![2]), DType::F64, 1.0)).unwrap();
    g.square("sq", "w").unwrap();
    g.reduce_sum("loss", "sq").unwrap();
    let grads = g.calculate_gradients("loss", &["w"]).unwrap();
    assert_eq!(grads["w"], "grad/w");
    assert!(g.variable("grad/w").is_some());
}

#[test]
fn gradient_of_unreachable_variable_fails() {
    let mut g = Graph::new("grad");
    g.var("w", NdArray::full(Shape::scalar(), DType::F64, 1.0)).unwrap();
    g.var("unused", NdArray::full(Shape::scalar(), DType::F64, 1.0)).unwrap();
    g.square("loss", "w").unwrap();
    let err = g.calculate_gradients("loss", &["unused"]).unwrap_err();
    assert!(matches!(err, GraphError::NoGradientPath(_)));
}

#[test]
fn control_flow_is_not_differentiable() {
    let mut g = Graph::new("grad");
    g.var("w", NdArray::full(Shape::scalar(), DType::F64, 1.0)).unwrap();
    g.enter("e", "f", "w").unwrap();
    g.exit("out", "e").unwrap();
    let err = g.calculate_gradients("out", &["w"]).unwrap_err();
    assert!(matches!(err, GraphError::NonDifferentiable { .. }));
}
