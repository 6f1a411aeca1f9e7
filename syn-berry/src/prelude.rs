//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d, Pos3d};

pub use crate::axis::{Axis, AxisOrder};
pub use crate::config::{
    CropSize, MarkerStyle, PadValues, PolarityColors, RenderConfig, SubVolume, TableFilter,
};
pub use crate::data::{BoxQuery, RemoteVolume, Volume, VolumeSource};
pub use crate::error::{ConfigError, FetchError, GeometryError, RenderError, ReviewError};
pub use crate::geometry::{Padding, Region3};
pub use crate::metadata::{InstanceRecord, MetadataTable, ReviewLabel};
pub use crate::render::{
    discover_instances, seeds_from_table, Detect, Discovery, InstanceSeed, OutputLayout,
    SynapseRecord,
};
pub use crate::rotation::RegressionMode;
pub use crate::session::{PageReport, Session};
