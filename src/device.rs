use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice};

/// Where the model and every tensor live for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePlacement {
    Host,
    Gpu(usize),
}

impl DevicePlacement {
    /// Only the first ID is used; an empty list means host compute.
    pub fn from_gpu_ids(ids: &[usize]) -> Self {
        match ids.first() {
            Some(&id) => Self::Gpu(id),
            None => Self::Host,
        }
    }

    pub fn host_device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }

    pub fn gpu_device(id: usize) -> WgpuDevice {
        WgpuDevice::DiscreteGpu(id)
    }
}
