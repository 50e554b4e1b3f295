use ndarray::{ArrayViewMut1, Zip};

pub trait Optimizer: Send + Sync {
    /// Updates one user row and one item row from the prediction error.
    fn update_factors(&self, error: f32, user: ArrayViewMut1<f32>, item: ArrayViewMut1<f32>);

    fn update_bias(&self, error: f32, bias: &mut f32);
}

/// Plain SGD with L2 shrinkage: `x += lr * (gradient - reg * x)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SGD {
    learning_rate: f32,
    regularization: f32,
}

impl SGD {
    pub fn new(learning_rate: f32, regularization: f32) -> Self {
        Self {
            learning_rate,
            regularization,
        }
    }
}

impl Optimizer for SGD {
    fn update_factors(&self, error: f32, user: ArrayViewMut1<f32>, item: ArrayViewMut1<f32>) {
        let (lr, reg) = (self.learning_rate, self.regularization);
        // Both rows read each other's pre-update component.
        Zip::from(user).and(item).for_each(|p, q| {
            let (user_feature, item_feature) = (*p, *q);
            *p += lr * (error * item_feature - reg * user_feature);
            *q += lr * (error * user_feature - reg * item_feature);
        });
    }

    fn update_bias(&self, error: f32, bias: &mut f32) {
        *bias += self.learning_rate * (error - self.regularization * *bias);
    }
}
