pub mod backend;
pub mod graph;
pub mod interop;
pub mod kernel;
pub mod recording;
pub mod wgpu_backend;

pub use backend::{
    display_buffer_size, BufferDesc, BufferHandle, ComputeBackend, FrameTimings, StageTiming, TextureDesc, TextureHandle,
};
pub use graph::{DispatchGraph, DispatchNode, NodeId, NodeOp};
pub use interop::DisplayInterop;
pub use kernel::{Kernel, KernelArg, KernelArgs, ParamKind};
pub use recording::RecordingBackend;
pub use wgpu_backend::WgpuBackend;
