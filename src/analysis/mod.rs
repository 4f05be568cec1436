pub mod bias;
pub mod blender;
pub mod economic;
pub mod hidden_signal;
pub mod trend;
