//! Dense feed-forward network with mini-batch backpropagation.
//!
//! Row-major batches: an input batch is `(batch, width)`, every layer holds
//! `weights: (inputs, outputs)` and `bias: (outputs)`.

use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

/// Regression loss, averaged over every element of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Loss {
    MeanSquaredError,
    Huber { delta: f64 },
}

impl Default for Loss {
    fn default() -> Self {
        Loss::Huber { delta: 1.0 }
    }
}

impl Loss {
    #[must_use]
    pub fn value(&self, prediction: &Array2<f64>, target: &Array2<f64>) -> f64 {
        let residual = prediction - target;
        let per_element = match *self {
            Loss::MeanSquaredError => residual.mapv(|r| r * r),
            Loss::Huber { delta } => residual.mapv(|r| {
                let abs = r.abs();
                if abs <= delta {
                    0.5 * r * r
                } else {
                    delta * (abs - 0.5 * delta)
                }
            }),
        };
        per_element.mean().unwrap_or(0.0)
    }

    /// d(loss)/d(prediction), already divided by the element count.
    #[must_use]
    pub fn gradient(&self, prediction: &Array2<f64>, target: &Array2<f64>) -> Array2<f64> {
        let residual = prediction - target;
        let count = residual.len().max(1) as f64;
        match *self {
            Loss::MeanSquaredError => residual.mapv(|r| 2.0 * r / count),
            Loss::Huber { delta } => residual.mapv(|r| r.clamp(-delta, delta) / count),
        }
    }
}

/// Mean absolute error, the secondary metric reported per epoch.
#[must_use]
pub fn mean_absolute_error(prediction: &Array2<f64>, target: &Array2<f64>) -> f64 {
    (prediction - target).mapv(f64::abs).mean().unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero bias.
    pub fn glorot<R: Rng + ?Sized>(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let weights = Array2::from_shape_fn((inputs, outputs), |_| rng.gen_range(-limit..limit));
        Self {
            weights,
            bias: Array1::zeros(outputs),
            activation,
        }
    }

    #[must_use]
    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    #[must_use]
    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    fn pre_activation(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

/// Options applied only while training.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Regularization {
    /// Fraction of hidden activations zeroed per batch.
    pub dropout: f64,
    /// L2 penalty on weights.
    pub l2: f64,
}

/// Adam with per-parameter first and second moments.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    moments: Vec<LayerMoments>,
}

#[derive(Debug, Clone)]
struct LayerMoments {
    m_weights: Array2<f64>,
    v_weights: Array2<f64>,
    m_bias: Array1<f64>,
    v_bias: Array1<f64>,
}

impl Adam {
    #[must_use]
    pub fn new(learning_rate: f64, layers: &[DenseLayer]) -> Self {
        let moments = layers
            .iter()
            .map(|layer| LayerMoments {
                m_weights: Array2::zeros(layer.weights.raw_dim()),
                v_weights: Array2::zeros(layer.weights.raw_dim()),
                m_bias: Array1::zeros(layer.bias.raw_dim()),
                v_bias: Array1::zeros(layer.bias.raw_dim()),
            })
            .collect();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments,
        }
    }

    fn begin_step(&mut self) -> f64 {
        self.step += 1;
        let correction1 = 1.0 - self.beta1.powi(self.step);
        let correction2 = 1.0 - self.beta2.powi(self.step);
        self.learning_rate * correction2.sqrt() / correction1
    }

    fn update_layer(
        &mut self,
        index: usize,
        layer: &mut DenseLayer,
        grad_weights: &Array2<f64>,
        grad_bias: &Array1<f64>,
        step_size: f64,
    ) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let moments = &mut self.moments[index];
        adam_update(&mut layer.weights, grad_weights, &mut moments.m_weights, &mut moments.v_weights, step_size, beta1, beta2, epsilon);
        adam_update(&mut layer.bias, grad_bias, &mut moments.m_bias, &mut moments.v_bias, step_size, beta1, beta2, epsilon);
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    step_size: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= step_size * *m / (v.sqrt() + epsilon);
        });
}

/// Stack of dense layers; the last one is the output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<DenseLayer>,
}

struct ForwardCache {
    input: Array2<f64>,
    pre_activation: Array2<f64>,
    dropout_mask: Option<Array2<f64>>,
}

impl Network {
    /// `input → hidden[0] → … → hidden[n-1] (ReLU) → output (linear)`.
    pub fn new<R: Rng + ?Sized>(input: usize, hidden: &[usize], output: usize, rng: &mut R) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut width = input;
        for &units in hidden {
            layers.push(DenseLayer::glorot(width, units, Activation::Relu, rng));
            width = units;
        }
        layers.push(DenseLayer::glorot(width, output, Activation::Linear, rng));
        Self { layers }
    }

    #[must_use]
    pub fn input_width(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::inputs)
    }

    #[must_use]
    pub fn output_width(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::outputs)
    }

    /// Every layer's input width must equal the previous layer's output width.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.layers.is_empty()
            && self.layers.windows(2).all(|pair| pair[0].outputs() == pair[1].inputs())
            && self
                .layers
                .iter()
                .all(|layer| layer.bias.len() == layer.outputs())
    }

    /// Inference pass, no dropout.
    #[must_use]
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        self.layers.iter().fold(input.clone(), |activation, layer| {
            layer.activation.apply(&layer.pre_activation(&activation))
        })
    }

    /// Sum of squared weights, for the L2 term.
    #[must_use]
    pub fn weight_norm(&self) -> f64 {
        self.layers
            .iter()
            .map(|layer| layer.weights.mapv(|w| w * w).sum())
            .sum()
    }

    /// One optimizer step on a batch. Returns the batch loss (before the step)
    /// and its predictions.
    pub fn train_batch<R: Rng + ?Sized>(
        &mut self,
        input: &Array2<f64>,
        target: &Array2<f64>,
        loss: &Loss,
        optimizer: &mut Adam,
        regularization: &Regularization,
        rng: &mut R,
    ) -> (f64, Array2<f64>) {
        let hidden_layers = self.layers.len().saturating_sub(1);
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut activation = input.clone();

        for (index, layer) in self.layers.iter().enumerate() {
            let pre_activation = layer.pre_activation(&activation);
            let mut output = layer.activation.apply(&pre_activation);
            let dropout_mask = if index < hidden_layers && regularization.dropout > 0.0 {
                let keep = 1.0 - regularization.dropout;
                let mask = Array2::from_shape_fn(output.raw_dim(), |_| {
                    if rng.gen::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                output *= &mask;
                Some(mask)
            } else {
                None
            };
            caches.push(ForwardCache {
                input: activation,
                pre_activation,
                dropout_mask,
            });
            activation = output;
        }

        let prediction = activation;
        let mut batch_loss = loss.value(&prediction, target);
        if regularization.l2 > 0.0 {
            batch_loss += regularization.l2 * self.weight_norm();
        }

        let step_size = optimizer.begin_step();
        let mut upstream = loss.gradient(&prediction, target);

        for (index, cache) in caches.iter().enumerate().rev() {
            let layer = &self.layers[index];
            if let Some(mask) = &cache.dropout_mask {
                upstream *= mask;
            }
            let delta = &upstream * &layer.activation.derivative(&cache.pre_activation);
            let mut grad_weights = cache.input.t().dot(&delta);
            if regularization.l2 > 0.0 {
                grad_weights.scaled_add(2.0 * regularization.l2, &layer.weights);
            }
            let grad_bias = delta.sum_axis(Axis(0));
            upstream = delta.dot(&layer.weights.t());

            optimizer.update_layer(index, &mut self.layers[index], &grad_weights, &grad_bias, step_size);
        }

        (batch_loss, prediction)
    }
}
