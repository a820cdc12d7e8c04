pub mod globimo;
pub mod mobiroam;
pub mod voyatel;

pub use globimo::{GlobimoAdapter, GlobimoConfig, GLOBIMO_SLUG};
pub use mobiroam::{MobiroamAdapter, MobiroamConfig, MOBIROAM_SLUG};
pub use voyatel::{VoyatelAdapter, VoyatelConfig, VOYATEL_SLUG};
