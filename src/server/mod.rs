pub mod builder;
pub mod handler;
pub mod listener;
pub mod static_files;

pub use builder::ServerBuilder;
pub use handler::RequestHandler;
pub use static_files::StaticFiles;
