// Infrastructure layer - External dependencies and adapters
pub mod chunked_stream;
pub mod config;
pub mod frame_renderer;
pub mod http_response;
pub mod influx_data_source;
