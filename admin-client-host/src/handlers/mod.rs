mod app;
mod health;

pub use app::app;
