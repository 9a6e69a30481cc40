use burn::{
    module::AutodiffModule,
    optim::{SimpleOptimizer, adaptor::OptimizerAdaptor},
    prelude::*,
    record::Record,
    tensor::backend::AutodiffBackend,
};

/// Adadelta (Zeiler, 2012): per-parameter step sizes from running averages
/// of squared gradients and squared updates.
#[derive(Config, Debug)]
pub struct AdadeltaConfig {
    #[config(default = 0.9)]
    rho: f64,
    #[config(default = 1e-6)]
    epsilon: f64,
}

impl AdadeltaConfig {
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(
        &self,
    ) -> OptimizerAdaptor<Adadelta, M, B> {
        OptimizerAdaptor::from(Adadelta {
            rho: self.rho,
            epsilon: self.epsilon,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Adadelta {
    rho: f64,
    epsilon: f64,
}

#[derive(Record, Clone)]
pub struct AdadeltaState<B: Backend, const D: usize> {
    pub square_avg: Tensor<B, D>,
    pub acc_delta: Tensor<B, D>,
}

impl<B: Backend> SimpleOptimizer<B> for Adadelta {
    type State<const D: usize> = AdadeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: f64,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (square_avg, acc_delta) = match state {
            Some(state) => (state.square_avg, state.acc_delta),
            None => (grad.zeros_like(), grad.zeros_like()),
        };

        let square_avg = square_avg
            .mul_scalar(self.rho)
            .add(grad.clone().powi_scalar(2).mul_scalar(1.0 - self.rho));
        let delta = acc_delta
            .clone()
            .add_scalar(self.epsilon)
            .sqrt()
            .div(square_avg.clone().add_scalar(self.epsilon).sqrt())
            .mul(grad);
        let acc_delta = acc_delta
            .mul_scalar(self.rho)
            .add(delta.clone().powi_scalar(2).mul_scalar(1.0 - self.rho));

        let tensor = tensor.sub(delta.mul_scalar(lr));

        (
            tensor,
            Some(AdadeltaState {
                square_avg,
                acc_delta,
            }),
        )
    }

    fn to_device<const D: usize>(state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        AdadeltaState {
            square_avg: state.square_avg.to_device(device),
            acc_delta: state.acc_delta.to_device(device),
        }
    }
}
