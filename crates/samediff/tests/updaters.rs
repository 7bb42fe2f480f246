use std::collections::HashMap;

use samediff::tensor::{NdArray, Order, Shape};
use samediff::train::{GradientUpdater, UpdaterConfig, UpdaterError};

fn grad(values: Vec<f64>) -> NdArray {
    let len = values.len();
    NdArray::from_vec(Shape::new(vec![len]), values).unwrap()
}

fn flat_state(config: &UpdaterConfig, grad_len: usize) -> NdArray {
    NdArray::zeros(
        Shape::new(vec![config.state_multiple() * grad_len]),
        samediff::DType::F64,
    )
}

#[test]
fn sgd_scales_by_learning_rate() {
    let config = UpdaterConfig::Sgd { lr: 0.1 };
    let mut updater = config.instantiate();
    let shape = Shape::new(vec![3]);
    updater
        .set_state_view(flat_state(&config, 3), &shape, Order::C, true)
        .unwrap();
    let mut g = grad(vec![1.0, -2.0, 4.0]);
    updater.apply(&mut g, 0.1, 0).unwrap();
    let v = g.to_vec::<f64>().unwrap();
    assert!((v[0] - 0.1).abs() < 1e-12);
    assert!((v[1] + 0.2).abs() < 1e-12);
    assert!((v[2] - 0.4).abs() < 1e-12);
}

#[test]
fn sgd_rejects_nonempty_state() {
    let config = UpdaterConfig::Sgd { lr: 0.1 };
    let mut updater = config.instantiate();
    let shape = Shape::new(vec![3]);
    let err = updater
        .set_state_view(grad(vec![0.0; 3]), &shape, Order::C, true)
        .unwrap_err();
    assert!(matches!(err, UpdaterError::WrongStateLength { expected: 0, actual: 3 }));
}

#[test]
fn nesterovs_matches_hand_computation() {
    let config = UpdaterConfig::Nesterovs { lr: 0.1, momentum: 0.9 };
    let mut updater = config.instantiate();
    let shape = Shape::new(vec![1]);
    updater
        .set_state_view(flat_state(&config, 1), &shape, Order::C, true)
        .unwrap();

    // Step 1: v = 0.9*0 - 0.1*1 = -0.1; update = 0.9*0 - 1.9*(-0.1) = 0.19
    let mut g = grad(vec![1.0]);
    updater.apply(&mut g, 0.1, 0).unwrap();
    assert!((g.scalar_value().unwrap() - 0.19).abs() < 1e-12);

    // Step 2: v = 0.9*(-0.1) - 0.1*1 = -0.19; update = 0.9*(-0.1) - 1.9*(-0.19)
    let mut g = grad(vec![1.0]);
    updater.apply(&mut g, 0.1, 1).unwrap();
    let expected = 0.9 * (-0.1) - 1.9 * (-0.19);
    assert!((g.scalar_value().unwrap() - expected).abs() < 1e-12);
}

#[test]
fn adagrad_accumulates_squared_gradients() {
    let config = UpdaterConfig::AdaGrad { lr: 0.5, eps: 1e-8 };
    let mut updater = config.instantiate();
    let shape = Shape::new(vec![1]);
    updater
        .set_state_view(flat_state(&config, 1), &shape, Order::C, true)
        .unwrap();

    let mut g = grad(vec![2.0]);
    updater.apply(&mut g, 0.5, 0).unwrap();
    // h = 4; update = 0.5*2/(2+eps)
    assert!((g.scalar_value().unwrap() - 0.5).abs() < 1e-6);

    let mut g = grad(vec![2.0]);
    updater.apply(&mut g, 0.5, 1).unwrap();
    // h = 8; update = 0.5*2/sqrt(8)
    assert!((g.scalar_value().unwrap() - 1.0 / 8.0f64.sqrt()).abs() < 1e-6);
}

#[test]
fn adam_first_step_is_bias_corrected() {
    let config = UpdaterConfig::Adam { lr: 0.001, beta1: 0.9, beta2: 0.999, eps: 1e-8 };
    let mut updater = config.instantiate();
    let shape = Shape::new(vec![1]);
    updater
        .set_state_view(flat_state(&config, 1), &shape, Order::C, true)
        .unwrap();

    let mut g = grad(vec![3.0]);
    updater.apply(&mut g, 0.001, 0).unwrap();
    // m = 0.3, v = 0.009; alpha = lr*sqrt(1-b2)/(1-b1)
    let alpha = 0.001 * (1.0f64 - 0.999).sqrt() / (1.0 - 0.9);
    let expected = alpha * 0.3 / (0.009f64.sqrt() + 1e-8);
    assert!((g.scalar_value().unwrap() - expected).abs() < 1e-12);
}

#[test]
fn adam_state_views_alias_the_flat_buffer() {
    let config = UpdaterConfig::adam(0.001);
    let mut updater = config.instantiate();
    let shape = Shape::new(vec![2]);
    let flat = flat_state(&config, 2);
    updater
        .set_state_view(flat.clone(), &shape, Order::C, true)
        .unwrap();

    let mut g = grad(vec![1.0, 2.0]);
    updater.apply(&mut g, 0.001, 0).unwrap();

    // The flat buffer holds [m0, m1, v0, v1] after the step.
    let state = flat.to_vec::<f64>().unwrap();
    assert!((state[0] - 0.1).abs() < 1e-12);
    assert!((state[1] - 0.2).abs() < 1e-12);
    assert!((state[2] - 0.001).abs() < 1e-12);
    assert!((state[3] - 0.004).abs() < 1e-12);
}

#[test]
fn state_multiple_mismatch_is_rejected() {
    // 1x and 3x state for Adam-family updaters must fail; 2x succeeds.
    let config = UpdaterConfig::adam(0.001);
    let shape = Shape::new(vec![4]);
    for bad_multiple in [1usize, 3] {
        let mut updater = config.instantiate();
        let flat = NdArray::zeros(
            Shape::new(vec![bad_multiple * 4]),
            samediff::DType::F64,
        );
        let err = updater
            .set_state_view(flat, &shape, Order::C, true)
            .unwrap_err();
        assert!(matches!(err, UpdaterError::WrongStateLength { expected: 8, .. }));
    }
    let mut updater = config.instantiate();
    updater
        .set_state_view(flat_state(&config, 4), &shape, Order::C, true)
        .unwrap();
}

#[test]
fn ada_belief_differs_from_adam_on_constant_gradients() {
    // With a constant gradient the belief (deviation) collapses toward zero,
    // so AdaBelief takes larger steps than Adam after warmup.
    let shape = Shape::new(vec![1]);
    let adam_cfg = UpdaterConfig::Adam { lr: 0.01, beta1: 0.9, beta2: 0.999, eps: 1e-8 };
    let belief_cfg = UpdaterConfig::AdaBelief { lr: 0.01, beta1: 0.9, beta2: 0.999, eps: 1e-8 };
    let mut adam = adam_cfg.instantiate();
    let mut belief = belief_cfg.instantiate();
    adam.set_state_view(flat_state(&adam_cfg, 1), &shape, Order::C, true)
        .unwrap();
    belief
        .set_state_view(flat_state(&belief_cfg, 1), &shape, Order::C, true)
        .unwrap();

    let mut adam_step = 0.0;
    let mut belief_step = 0.0;
    for i in 0..50 {
        let mut g = grad(vec![1.0]);
        adam.apply(&mut g, 0.01, i).unwrap();
        adam_step = g.scalar_value().unwrap();
        let mut g = grad(vec![1.0]);
        belief.apply(&mut g, 0.01, i).unwrap();
        belief_step = g.scalar_value().unwrap();
    }
    assert!(belief_step > adam_step);
}

#[test]
fn set_state_validates_key_set() {
    let config = UpdaterConfig::adam(0.001);
    let mut updater = config.instantiate();
    let mut wrong = HashMap::new();
    wrong.insert("M".to_string(), grad(vec![0.0]));
    let err = updater.set_state(wrong).unwrap_err();
    assert!(matches!(err, UpdaterError::WrongStateKeys { .. }));

    let mut right = HashMap::new();
    right.insert("M".to_string(), grad(vec![0.0]));
    right.insert("V".to_string(), grad(vec![0.0]));
    updater.set_state(right).unwrap();
}

#[test]
fn apply_without_state_fails() {
    let config = UpdaterConfig::adam(0.001);
    let mut updater = config.instantiate();
    let mut g = grad(vec![1.0]);
    let err = updater.apply(&mut g, 0.001, 0).unwrap_err();
    assert!(matches!(err, UpdaterError::NotInitialized));
}
