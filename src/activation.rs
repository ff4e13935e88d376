//! Activation functions for network nodes.
//!
//! Classification outputs are tagged [`Activation::Softmax`]: the node itself
//! passes its pre-activation sum through unchanged and the normalization is
//! applied afterwards over the whole classification group (see [`softmax`]),
//! because it needs every sibling's value.

use serde::{Deserialize, Serialize};

/// Activation function tags supported by network nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Activation {
    /// Identity: f(x) = x. Used by input and bias nodes.
    #[default]
    None,
    /// Sigmoid: f(x) = 1 / (1 + e^(-x))
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Group softmax. The node applies identity; callers normalize the whole
    /// output group with [`softmax`].
    Softmax,
}

impl Activation {
    /// Apply this activation function to an input value.
    ///
    /// NaN propagates consistently; infinite inputs produce the function's
    /// limit where one exists.
    #[inline]
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }

        match self {
            Self::None | Self::Softmax => x,
            Self::Sigmoid => {
                if x == f64::INFINITY {
                    return 1.0;
                }
                if x == f64::NEG_INFINITY {
                    return 0.0;
                }
                // sigmoid(-709) underflows to 0, sigmoid(709) rounds to 1
                let clamped = x.clamp(-709.0, 709.0);
                1.0 / (1.0 + (-clamped).exp())
            }
            Self::Tanh => {
                if x == f64::INFINITY {
                    return 1.0;
                }
                if x == f64::NEG_INFINITY {
                    return -1.0;
                }
                x.tanh()
            }
            Self::Relu => {
                if x == f64::NEG_INFINITY {
                    return 0.0;
                }
                x.max(0.0)
            }
        }
    }
}

/// Normalize a group of raw output values into a probability distribution.
///
/// Uses the max-shift formulation to stay finite for large magnitudes. An
/// empty slice is a no-op; a group whose exponentials sum to zero degrades to
/// the uniform distribution.
pub fn softmax(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }

    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }

    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    } else {
        let uniform = 1.0 / values.len() as f64;
        for v in values.iter_mut() {
            *v = uniform;
        }
    }
}
