// Application layer - Chart orchestration and the capabilities it consumes
pub mod chart_surface;
pub mod data_source;
pub mod date_range_resolver;
pub mod renderer;

#[cfg(test)]
pub mod testing;
