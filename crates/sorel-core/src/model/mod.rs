// Domain model: device identity, datapoint definitions, decoded values.

pub mod datapoint;
pub mod device_key;
pub mod value;

pub use datapoint::{Catalog, DataType, DatapointDef, LabelFormat, Step};
pub use device_key::DeviceKey;
pub use value::DecodedValue;
