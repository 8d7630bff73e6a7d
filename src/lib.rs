mod density;
mod graph;
mod midi_importer;
mod model;
mod util;

pub use density::*;
pub use density::measures::*;
pub use density::streams::*;
pub use graph::*;
pub use graph::mailbox::*;
pub use graph::mesh::*;
pub use graph::worker::*;
pub use midi_importer::*;
pub use model::chart::*;
pub use model::color::*;
pub use model::config::*;
pub use model::timing::*;
pub use util::*;
