pub mod night_vision;
pub mod overlay;
pub mod traits;
