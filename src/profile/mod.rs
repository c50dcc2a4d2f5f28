pub mod model;
pub mod store;

pub use model::{BeneficiaryStats, ClientProfile, SeasonalSlot};
pub use store::{ProfileStore, SharedProfileStore};
