mod postcode;
mod property;
mod timestamp;

pub use postcode::Postcode;
pub(crate) use property::iso_date;
pub use property::{
    FactValue, Field, FloodRiskLevel, Observed, PropertyPayload, PropertyQuery, PropertyType,
    SaleRecord, SaleStatistics, Strategy, Tenure,
};
pub use timestamp::UtcDateTime;
