//! Domain types shared by the codec, the registry and the ingestion pipeline.

pub mod constellation;
pub mod encoding;
pub mod schema;
pub mod template;
pub mod time;
pub mod value;

pub use constellation::{ConstellationKey, ObservationConstellation, ObservationType};
pub use encoding::EncodingRule;
pub use schema::{Field, FieldKind, FieldRole, ResultSchema, SchemaError};
pub use template::{FeatureDescriptor, FeatureRef, ResultTemplate};
pub use time::{ResultTime, TimeParseError, TimeValue};
pub use value::TypedValue;
