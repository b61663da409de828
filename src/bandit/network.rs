//! Fixed-topology ReLU network used as the reward model.
//!
//! ## Architecture
//!
//! ```text
//! x (batch × d)
//!   → W1 (d × m)   → ReLU
//!   → Wl (m × m)   → ReLU      (l = 2..L-1)
//!   → WL (m × 1)
//!   → × √m
//! ```
//!
//! ## Initialization
//!
//! Every hidden weight block is drawn once from N(0, 4/m) and placed twice on
//! the block diagonal; the output column holds N(0, 2/m) draws in its top half
//! and their negation in its bottom half. For inputs whose two halves coincide
//! the two hidden paths carry identical activations, so the initial network
//! outputs exactly zero (up to summation order).
//!
//! Parameters are an ordered list of named layers. That order, with row-major
//! order inside each matrix, is the layout of every flattened gradient.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::errors::{Error, Result};

/// One named weight matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// "W1" .. "WL"
    pub name: String,
    pub weights: DMatrix<f64>,
}

/// Intermediate values of a forward pass, consumed by [`NeuralNetwork::backward`].
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    /// Input to each layer: `inputs[0]` is the batch itself.
    inputs: Vec<DMatrix<f64>>,
    /// Pre-activation of every hidden layer.
    pre_activations: Vec<DMatrix<f64>>,
    /// Scaled network output, one entry per batch row.
    output: DVector<f64>,
}

impl ForwardTrace {
    pub fn output(&self) -> &DVector<f64> {
        &self.output
    }

    pub fn batch_size(&self) -> usize {
        self.output.len()
    }
}

/// Feed-forward reward network with a frozen copy of its initial weights.
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    input_dim: usize,
    width: usize,
    layers: Vec<Layer>,
    /// Independent copy taken at construction. Never aliased with `layers`.
    initial: Vec<Layer>,
    num_parameters: usize,
}

impl NeuralNetwork {
    /// Build the network with the symmetric initialization.
    ///
    /// # Arguments
    /// * `input_dim` - context dimension d (even)
    /// * `num_layers` - number of weight layers L (>= 2)
    /// * `width` - hidden width m (even)
    /// * `seed` - seed of the initialization draws
    pub fn new(input_dim: usize, num_layers: usize, width: usize, seed: u64) -> Result<Self> {
        if input_dim == 0 || input_dim % 2 != 0 {
            return Err(Error::config(format!(
                "input dimension must be a positive even number, got {input_dim}"
            )));
        }
        if width == 0 || width % 2 != 0 {
            return Err(Error::config(format!(
                "width must be a positive even number, got {width}"
            )));
        }
        if num_layers < 2 {
            return Err(Error::config(format!(
                "network needs at least 2 layers, got {num_layers}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let half_d = input_dim / 2;
        let half_m = width / 2;
        let hidden_scale = (4.0 / width as f64).sqrt();
        let output_scale = (2.0 / width as f64).sqrt();

        // Draw order: input block, shared middle block, output half-column.
        let input_block = gaussian_block(&mut rng, half_d, half_m, hidden_scale);
        let middle_block = gaussian_block(&mut rng, half_m, half_m, hidden_scale);
        let output_half: Vec<f64> = (0..half_m)
            .map(|_| rng.sample::<f64, _>(StandardNormal) * output_scale)
            .collect();

        let mut layers = Vec::with_capacity(num_layers);
        for index in 1..=num_layers {
            let weights = if index == 1 {
                block_diagonal(&input_block)
            } else if index == num_layers {
                DMatrix::from_fn(width, 1, |i, _| {
                    if i < half_m {
                        output_half[i]
                    } else {
                        -output_half[i - half_m]
                    }
                })
            } else {
                block_diagonal(&middle_block)
            };
            layers.push(Layer {
                name: format!("W{index}"),
                weights,
            });
        }

        let num_parameters = layers.iter().map(|l| l.weights.len()).sum();
        let initial = layers.clone();

        Ok(Self {
            input_dim,
            width,
            layers,
            initial,
            num_parameters,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Total scalar parameter count p.
    pub fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    /// Live parameters in construction order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The frozen initial parameters.
    pub fn initial_layers(&self) -> &[Layer] {
        &self.initial
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Predicted reward for every row of `batch` (shape `batch × d`).
    pub fn forward(&self, batch: &DMatrix<f64>) -> Result<DVector<f64>> {
        Ok(self.forward_trace(batch)?.output)
    }

    /// Predicted reward of a single context.
    pub fn predict(&self, context: &[f64]) -> Result<f64> {
        let batch = self.single_row(context)?;
        Ok(self.forward(&batch)?[0])
    }

    /// Forward pass keeping the intermediates needed for backpropagation.
    pub fn forward_trace(&self, batch: &DMatrix<f64>) -> Result<ForwardTrace> {
        if batch.ncols() != self.input_dim {
            return Err(Error::dimension("context columns", self.input_dim, batch.ncols()));
        }

        let last = self.layers.len() - 1;
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(last);
        let mut hidden = batch.clone();

        for (index, layer) in self.layers.iter().enumerate() {
            let z = &hidden * &layer.weights;
            inputs.push(hidden);
            if index < last {
                hidden = z.map(relu);
                pre_activations.push(z);
            } else {
                hidden = z;
            }
        }

        let scale = (self.width as f64).sqrt();
        let output = DVector::from_iterator(hidden.nrows(), hidden.column(0).iter().map(|v| v * scale));

        Ok(ForwardTrace {
            inputs,
            pre_activations,
            output,
        })
    }

    /// Backpropagate `upstream` (dLoss/dOutput per batch row) through a traced pass.
    ///
    /// Returns one gradient matrix per layer, shaped like that layer's weights.
    pub fn backward(&self, trace: &ForwardTrace, upstream: &DVector<f64>) -> Result<Vec<DMatrix<f64>>> {
        if upstream.len() != trace.batch_size() {
            return Err(Error::dimension("upstream gradient length", trace.batch_size(), upstream.len()));
        }

        let scale = (self.width as f64).sqrt();
        let mut delta = DMatrix::from_column_slice(upstream.len(), 1, upstream.as_slice()) * scale;
        let mut grads = Vec::with_capacity(self.layers.len());

        for index in (0..self.layers.len()).rev() {
            grads.push(trace.inputs[index].transpose() * &delta);
            if index > 0 {
                let back = &delta * self.layers[index].weights.transpose();
                delta = back.component_mul(&trace.pre_activations[index - 1].map(relu_derivative));
            }
        }

        grads.reverse();
        Ok(grads)
    }

    /// Output and flattened parameter gradient for a single context.
    ///
    /// The gradient has length p: layer 1 first, output layer last,
    /// row-major inside each matrix.
    pub fn gradient(&self, context: &[f64]) -> Result<(f64, DVector<f64>)> {
        let batch = self.single_row(context)?;
        let trace = self.forward_trace(&batch)?;
        let grads = self.backward(&trace, &DVector::from_element(1, 1.0))?;
        Ok((trace.output[0], flatten_row_major(&grads, self.num_parameters)))
    }

    /// Squared euclidean distance between live and initial parameters.
    pub fn distance_sq_from_initial(&self) -> f64 {
        self.layers
            .iter()
            .zip(&self.initial)
            .map(|(live, init)| (&live.weights - &init.weights).norm_squared())
            .sum()
    }

    /// Whether every live parameter is finite.
    pub fn is_finite(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.weights.iter().all(|v| v.is_finite()))
    }

    /// Anchor penalty `λ‖θ − θ₀‖² / (2p)`.
    pub fn regularization(&self, lambda: f64) -> f64 {
        lambda * self.distance_sq_from_initial() / (2.0 * self.num_parameters as f64)
    }

    /// Overwrite every layer with its initial value (explicit value copy).
    pub fn reset_to_initial(&mut self) {
        for (live, init) in self.layers.iter_mut().zip(&self.initial) {
            live.weights.copy_from(&init.weights);
        }
    }

    /// Plain gradient-descent step `W ← W − eta·grad` on every layer.
    pub fn apply_gradient_step(&mut self, grads: &[DMatrix<f64>], eta: f64) -> Result<()> {
        if grads.len() != self.layers.len() {
            return Err(Error::dimension("gradient layers", self.layers.len(), grads.len()));
        }
        for (layer, grad) in self.layers.iter_mut().zip(grads) {
            if grad.shape() != layer.weights.shape() {
                return Err(Error::dimension("gradient entries", layer.weights.len(), grad.len()));
            }
            layer.weights -= grad * eta;
        }
        Ok(())
    }

    fn single_row(&self, context: &[f64]) -> Result<DMatrix<f64>> {
        if context.len() != self.input_dim {
            return Err(Error::dimension("context length", self.input_dim, context.len()));
        }
        Ok(DMatrix::from_row_slice(1, self.input_dim, context))
    }
}

/// Concatenate matrices into one vector, row-major within each matrix.
pub fn flatten_row_major(matrices: &[DMatrix<f64>], total: usize) -> DVector<f64> {
    let mut flat = Vec::with_capacity(total);
    for m in matrices {
        for row in m.row_iter() {
            flat.extend(row.iter().copied());
        }
    }
    DVector::from_vec(flat)
}

fn relu(v: f64) -> f64 {
    v.max(0.0)
}

fn relu_derivative(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// `rows × cols` block of N(0, 1)·scale draws, filled row by row.
fn gaussian_block(rng: &mut StdRng, rows: usize, cols: usize, scale: f64) -> DMatrix<f64> {
    let values: Vec<f64> = (0..rows * cols)
        .map(|_| rng.sample::<f64, _>(StandardNormal) * scale)
        .collect();
    DMatrix::from_row_slice(rows, cols, &values)
}

/// Place `block` on both diagonal blocks of a zero matrix twice its size.
fn block_diagonal(block: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = block.shape();
    let mut m = DMatrix::zeros(2 * rows, 2 * cols);
    m.view_mut((0, 0), (rows, cols)).copy_from(block);
    m.view_mut((rows, cols), (rows, cols)).copy_from(block);
    m
}
