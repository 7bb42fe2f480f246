//! Gradient updaters with externally owned flat state.
//!
//! Updater state lives in one flat rank-1 array per parameter, carved into
//! equal segments (one per state key) and reshaped to the gradient's shape
//! and ordering. The segments alias the flat buffer, so checkpointing the
//! flat array captures the full optimizer state.

use std::collections::HashMap;

use thiserror::Error;

use crate::tensor::{NdArray, Order, Shape};

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("state keys mismatch: expected {expected:?}, got {actual:?}")]
    WrongStateKeys {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("flat state has {actual} elements, updater requires {expected}")]
    WrongStateLength { expected: usize, actual: usize },
    #[error("updater state was not initialized before apply")]
    NotInitialized,
    #[error("state array '{key}' has shape {actual:?}, gradient shape is {expected:?}")]
    StateShape {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// One optimizer's per-parameter update rule plus its state.
///
/// `apply` rewrites the gradient in place into the step to subtract from the
/// parameter.
pub trait GradientUpdater {
    fn state_keys(&self) -> &'static [&'static str];

    /// Flat state elements per gradient element.
    fn state_multiple(&self) -> usize;

    /// Installs the flat state view, splitting it into per-key segments
    /// reshaped to the gradient's shape and order. With `initialize` the
    /// segments are zeroed (through the shared buffer).
    fn set_state_view(
        &mut self,
        view: NdArray,
        grad_shape: &Shape,
        order: Order,
        initialize: bool,
    ) -> Result<(), UpdaterError>;

    /// Replaces the state from named arrays, e.g. when restoring a
    /// checkpoint. The key set must match `state_keys` exactly.
    fn set_state(&mut self, state: HashMap<String, NdArray>) -> Result<(), UpdaterError>;

    /// Current state arrays by key.
    fn state(&self) -> HashMap<String, NdArray>;

    /// Transforms the raw gradient into the update step, advancing state.
    /// `lr` is the schedule-adjusted learning rate, `iteration` the global
    /// step counter (0-based).
    fn apply(
        &mut self,
        gradient: &mut NdArray,
        lr: f64,
        iteration: u64,
    ) -> Result<(), UpdaterError>;
}

/// Splits a flat view into `keys.len()` segments shaped like the gradient.
fn carve_state(
    view: &NdArray,
    keys: &'static [&'static str],
    grad_shape: &Shape,
    order: Order,
    initialize: bool,
) -> Result<Vec<NdArray>, UpdaterError> {
    let n = grad_shape.num_elements();
    let expected = keys.len() * n;
    if view.len() != expected {
        return Err(UpdaterError::WrongStateLength {
            expected,
            actual: view.len(),
        });
    }
    let mut segments = Vec::with_capacity(keys.len());
    for i in 0..keys.len() {
        let mut segment = view
            .subrange(i * n, n)
            .and_then(|s| s.reshape_ordered(grad_shape.clone(), order))
            .map_err(|_| UpdaterError::WrongStateLength {
                expected,
                actual: view.len(),
            })?;
        if initialize {
            segment.fill(0.0);
        }
        segments.push(segment);
    }
    Ok(segments)
}

fn check_keys(
    expected: &'static [&'static str],
    state: &HashMap<String, NdArray>,
) -> Result<(), UpdaterError> {
    let mut actual: Vec<String> = state.keys().cloned().collect();
    actual.sort();
    let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    want.sort();
    if actual != want {
        return Err(UpdaterError::WrongStateKeys {
            expected: want,
            actual,
        });
    }
    Ok(())
}

fn take_state(
    mut state: HashMap<String, NdArray>,
    key: &str,
    grad_shape: Option<&Shape>,
) -> Result<NdArray, UpdaterError> {
    let array = state.remove(key).expect("key presence checked");
    if let Some(shape) = grad_shape {
        if array.shape() != shape {
            return Err(UpdaterError::StateShape {
                key: key.to_string(),
                expected: shape.dims().to_vec(),
                actual: array.shape().dims().to_vec(),
            });
        }
    }
    Ok(array)
}

/// Row-major elementwise update over the gradient and its state segments.
/// `f` receives (g, states) and returns the replacement gradient value,
/// mutating the state slots in place.
fn zip_apply(
    gradient: &mut NdArray,
    states: &mut [&mut NdArray],
    mut f: impl FnMut(f64, &mut [f64]) -> f64,
) {
    let mut state_values: Vec<Vec<f64>> = states.iter().map(|s| s.to_f64_vec()).collect();
    let mut slots = vec![0.0; states.len()];
    let mut i = 0;
    gradient.map_values_inplace(|g| {
        for (slot, column) in slots.iter_mut().zip(&state_values) {
            *slot = column[i];
        }
        let out = f(g, &mut slots);
        for (slot, column) in slots.iter().zip(&mut state_values) {
            column[i] = *slot;
        }
        i += 1;
        out
    });
    for (state, column) in states.iter_mut().zip(&state_values) {
        let mut j = 0;
        state.map_values_inplace(|_| {
            let v = column[j];
            j += 1;
            v
        });
    }
}

/// Plain SGD. Stateless: the flat view must be empty.
#[derive(Debug, Default)]
pub struct Sgd;

impl Sgd {
    pub fn new() -> Self {
        Sgd
    }
}

impl GradientUpdater for Sgd {
    fn state_keys(&self) -> &'static [&'static str] {
        &[]
    }

    fn state_multiple(&self) -> usize {
        0
    }

    fn set_state_view(
        &mut self,
        view: NdArray,
        _grad_shape: &Shape,
        _order: Order,
        _initialize: bool,
    ) -> Result<(), UpdaterError> {
        if !view.is_empty() {
            return Err(UpdaterError::WrongStateLength {
                expected: 0,
                actual: view.len(),
            });
        }
        Ok(())
    }

    fn set_state(&mut self, state: HashMap<String, NdArray>) -> Result<(), UpdaterError> {
        check_keys(&[], &state)
    }

    fn state(&self) -> HashMap<String, NdArray> {
        HashMap::new()
    }

    fn apply(
        &mut self,
        gradient: &mut NdArray,
        lr: f64,
        _iteration: u64,
    ) -> Result<(), UpdaterError> {
        gradient.map_values_inplace(|g| lr * g);
        Ok(())
    }
}

/// Nesterov momentum.
#[derive(Debug)]
pub struct Nesterovs {
    momentum: f64,
    v: Option<NdArray>,
}

impl Nesterovs {
    pub fn new(momentum: f64) -> Self {
        Nesterovs { momentum, v: None }
    }
}

impl GradientUpdater for Nesterovs {
    fn state_keys(&self) -> &'static [&'static str] {
        &["V"]
    }

    fn state_multiple(&self) -> usize {
        1
    }

    fn set_state_view(
        &mut self,
        view: NdArray,
        grad_shape: &Shape,
        order: Order,
        initialize: bool,
    ) -> Result<(), UpdaterError> {
        let mut segments = carve_state(&view, self.state_keys(), grad_shape, order, initialize)?;
        self.v = Some(segments.remove(0));
        Ok(())
    }

    fn set_state(&mut self, state: HashMap<String, NdArray>) -> Result<(), UpdaterError> {
        check_keys(self.state_keys(), &state)?;
        self.v = Some(take_state(state, "V", None)?);
        Ok(())
    }

    fn state(&self) -> HashMap<String, NdArray> {
        self.v
            .iter()
            .map(|v| ("V".to_string(), v.clone()))
            .collect()
    }

    fn apply(
        &mut self,
        gradient: &mut NdArray,
        lr: f64,
        _iteration: u64,
    ) -> Result<(), UpdaterError> {
        let v = self.v.as_mut().ok_or(UpdaterError::NotInitialized)?;
        let mu = self.momentum;
        zip_apply(gradient, &mut [v], |g, s| {
            let v_prev = s[0];
            let v_new = mu * v_prev - lr * g;
            s[0] = v_new;
            mu * v_prev - (1.0 + mu) * v_new
        });
        Ok(())
    }
}

/// AdaGrad: per-element accumulated squared gradient.
#[derive(Debug)]
pub struct AdaGrad {
    eps: f64,
    h: Option<NdArray>,
}

impl AdaGrad {
    pub fn new(eps: f64) -> Self {
        AdaGrad { eps, h: None }
    }
}

impl GradientUpdater for AdaGrad {
    fn state_keys(&self) -> &'static [&'static str] {
        &["GRAD"]
    }

    fn state_multiple(&self) -> usize {
        1
    }

    fn set_state_view(
        &mut self,
        view: NdArray,
        grad_shape: &Shape,
        order: Order,
        initialize: bool,
    ) -> Result<(), UpdaterError> {
        let mut segments = carve_state(&view, self.state_keys(), grad_shape, order, initialize)?;
        self.h = Some(segments.remove(0));
        Ok(())
    }

    fn set_state(&mut self, state: HashMap<String, NdArray>) -> Result<(), UpdaterError> {
        check_keys(self.state_keys(), &state)?;
        self.h = Some(take_state(state, "GRAD", None)?);
        Ok(())
    }

    fn state(&self) -> HashMap<String, NdArray> {
        self.h
            .iter()
            .map(|h| ("GRAD".to_string(), h.clone()))
            .collect()
    }

    fn apply(
        &mut self,
        gradient: &mut NdArray,
        lr: f64,
        _iteration: u64,
    ) -> Result<(), UpdaterError> {
        let h = self.h.as_mut().ok_or(UpdaterError::NotInitialized)?;
        let eps = self.eps;
        zip_apply(gradient, &mut [h], |g, s| {
            s[0] += g * g;
            lr * g / (s[0].sqrt() + eps)
        });
        Ok(())
    }
}

/// Adam with bias correction.
#[derive(Debug)]
pub struct Adam {
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Option<NdArray>,
    v: Option<NdArray>,
}

impl Adam {
    pub fn new(beta1: f64, beta2: f64, eps: f64) -> Self {
        Adam {
            beta1,
            beta2,
            eps,
            m: None,
            v: None,
        }
    }
}

impl GradientUpdater for Adam {
    fn state_keys(&self) -> &'static [&'static str] {
        &["M", "V"]
    }

    fn state_multiple(&self) -> usize {
        2
    }

    fn set_state_view(
        &mut self,
        view: NdArray,
        grad_shape: &Shape,
        order: Order,
        initialize: bool,
    ) -> Result<(), UpdaterError> {
        let mut segments = carve_state(&view, self.state_keys(), grad_shape, order, initialize)?;
        self.v = Some(segments.remove(1));
        self.m = Some(segments.remove(0));
        Ok(())
    }

    fn set_state(&mut self, state: HashMap<String, NdArray>) -> Result<(), UpdaterError> {
        check_keys(self.state_keys(), &state)?;
        let mut state = state;
        let v = state.remove("V").expect("key presence checked");
        self.m = Some(take_state(state, "M", None)?);
        self.v = Some(v);
        Ok(())
    }

    fn state(&self) -> HashMap<String, NdArray> {
        let mut out = HashMap::new();
        if let Some(m) = &self.m {
            out.insert("M".to_string(), m.clone());
        }
        if let Some(v) = &self.v {
            out.insert("V".to_string(), v.clone());
        }
        out
    }

    fn apply(
        &mut self,
        gradient: &mut NdArray,
        lr: f64,
        iteration: u64,
    ) -> Result<(), UpdaterError> {
        let (m, v) = match (self.m.as_mut(), self.v.as_mut()) {
            (Some(m), Some(v)) => (m, v),
            _ => return Err(UpdaterError::NotInitialized),
        };
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
        let t = (iteration + 1) as i32;
        let alpha = lr * (1.0 - b2.powi(t)).sqrt() / (1.0 - b1.powi(t));
        zip_apply(gradient, &mut [m, v], |g, s| {
            s[0] = b1 * s[0] + (1.0 - b1) * g;
            s[1] = b2 * s[1] + (1.0 - b2) * g * g;
            alpha * s[0] / (s[1].sqrt() + eps)
        });
        Ok(())
    }
}

/// AdaBelief: Adam on the belief (gradient deviation from its mean).
#[derive(Debug)]
pub struct AdaBelief {
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Option<NdArray>,
    s: Option<NdArray>,
}

impl AdaBelief {
    pub fn new(beta1: f64, beta2: f64, eps: f64) -> Self {
        AdaBelief {
            beta1,
            beta2,
            eps,
            m: None,
            s: None,
        }
    }
}

impl GradientUpdater for AdaBelief {
    fn state_keys(&self) -> &'static [&'static str] {
        &["M", "S"]
    }

    fn state_multiple(&self) -> usize {
        2
    }

    fn set_state_view(
        &mut self,
        view: NdArray,
        grad_shape: &Shape,
        order: Order,
        initialize: bool,
    ) -> Result<(), UpdaterError> {
        let mut segments = carve_state(&view, self.state_keys(), grad_shape, order, initialize)?;
        self.s = Some(segments.remove(1));
        self.m = Some(segments.remove(0));
        Ok(())
    }

    fn set_state(&mut self, state: HashMap<String, NdArray>) -> Result<(), UpdaterError> {
        check_keys(self.state_keys(), &state)?;
        let mut state = state;
        let s = state.remove("S").expect("key presence checked");
        self.m = Some(take_state(state, "M", None)?);
        self.s = Some(s);
        Ok(())
    }

    fn state(&self) -> HashMap<String, NdArray> {
        let mut out = HashMap::new();
        if let Some(m) = &self.m {
            out.insert("M".to_string(), m.clone());
        }
        if let Some(s) = &self.s {
            out.insert("S".to_string(), s.clone());
        }
        out
    }

    fn apply(
        &mut self,
        gradient: &mut NdArray,
        lr: f64,
        iteration: u64,
    ) -> Result<(), UpdaterError> {
        let (m, s) = match (self.m.as_mut(), self.s.as_mut()) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(UpdaterError::NotInitialized),
        };
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
        let t = (iteration + 1) as i32;
        let m_corr = 1.0 - b1.powi(t);
        let s_corr = 1.0 - b2.powi(t);
        zip_apply(gradient, &mut [m, s], |g, st| {
            st[0] = b1 * st[0] + (1.0 - b1) * g;
            let dev = g - st[0];
            st[1] = b2 * st[1] + (1.0 - b2) * dev * dev + eps;
            let m_hat = st[0] / m_corr;
            let s_hat = st[1] / s_corr;
            lr * m_hat / (s_hat.sqrt() + eps)
        });
        Ok(())
    }
}
