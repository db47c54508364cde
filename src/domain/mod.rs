// Domain layer - Chart engine models and pure policies
pub mod axis;
pub mod date_window;
pub mod series;
pub mod viewport;
