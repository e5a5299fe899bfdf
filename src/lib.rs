pub mod prelude;
pub mod error;
pub mod config;
pub mod gfx;
pub mod scene;
pub mod culling;
pub mod compute_program;
pub mod graphics_program;
pub mod renderer;
