//! Parameter expansion: `{case} x {layout} x {api}` into named, immutable test records.

use std::fmt;
use std::str::FromStr;

use bnorm::{BnTestCase, Layout4D};

use crate::compare::Tolerance;
use crate::error::HarnessError;

/// Batch-norm operation exercised by a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BnOp {
    ForwardInference,
    ForwardTraining,
    Backward,
}

impl BnOp {
    pub const ALL: [BnOp; 3] = [BnOp::ForwardInference, BnOp::ForwardTraining, BnOp::Backward];

    pub const fn as_str(self) -> &'static str {
        match self {
            BnOp::ForwardInference => "infer",
            BnOp::ForwardTraining => "fwd_train",
            BnOp::Backward => "bwd",
        }
    }

    /// Absolute tolerance applied to every output of the operation when no override matches.
    pub const fn default_tolerance(self) -> Tolerance {
        match self {
            BnOp::ForwardInference | BnOp::ForwardTraining => Tolerance::absolute(4e-3),
            BnOp::Backward => Tolerance::absolute(5e-4),
        }
    }
}

impl fmt::Display for BnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation of the device batch-norm API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    /// Shared descriptor for scale, bias, mean and variance.
    V1,
    /// Separate descriptors per auxiliary buffer.
    V2,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 2] = [ApiVersion::V1, ApiVersion::V2];

    pub const fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V1 => "api_v1",
            ApiVersion::V2 => "api_v2",
        }
    }

    pub const fn tag(self) -> u32 {
        match self {
            ApiVersion::V1 => 0,
            ApiVersion::V2 => 1,
        }
    }

    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ApiVersion::V1),
            1 => Some(ApiVersion::V2),
            _ => None,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = HarnessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "0" | "v1" | "api_v1" => Ok(ApiVersion::V1),
            "1" | "v2" | "api_v2" => Ok(ApiVersion::V2),
            _ => Err(HarnessError::UnknownApiVersion(value.to_string())),
        }
    }
}

/// Name of an API generation by raw tag; unknown tags map to `"unknown_api_version"`.
pub fn api_version_to_string(tag: u32) -> &'static str {
    ApiVersion::from_tag(tag).map_or("unknown_api_version", ApiVersion::as_str)
}

pub fn layout_to_string(layout: Layout4D) -> &'static str {
    layout.as_str()
}

pub fn parse_layout(value: &str) -> Result<Layout4D, HarnessError> {
    match value.trim().to_ascii_uppercase().as_str() {
        "NCHW" => Ok(Layout4D::NCHW),
        "NHWC" => Ok(Layout4D::NHWC),
        _ => Err(HarnessError::UnknownLayout(value.to_string())),
    }
}

/// API selector as carried by a parameter record; parsing never fails so that an unknown
/// selector surfaces as a failed test instance rather than a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApiSelector {
    Known(ApiVersion),
    Unknown(String),
}

impl ApiSelector {
    pub fn parse(value: &str) -> Self {
        value
            .parse()
            .map_or_else(|_| ApiSelector::Unknown(value.to_string()), ApiSelector::Known)
    }

    pub fn from_tag(tag: u32) -> Self {
        ApiVersion::from_tag(tag)
            .map_or_else(|| ApiSelector::Unknown(tag.to_string()), ApiSelector::Known)
    }

    pub fn resolve(&self) -> Result<ApiVersion, HarnessError> {
        match self {
            ApiSelector::Known(api) => Ok(*api),
            ApiSelector::Unknown(raw) => Err(HarnessError::UnknownApiVersion(raw.clone())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApiSelector::Known(api) => api.as_str(),
            ApiSelector::Unknown(_) => "unknown_api_version",
        }
    }
}

impl From<ApiVersion> for ApiSelector {
    fn from(api: ApiVersion) -> Self {
        ApiSelector::Known(api)
    }
}

/// One test instance of a suite.
#[derive(Debug, Clone, PartialEq)]
pub struct TestParams {
    pub case: BnTestCase,
    pub layout: Layout4D,
    pub api: ApiSelector,
    /// Position in the expansion; distinguishes cases sharing a layout and API.
    pub index: usize,
}

impl TestParams {
    /// Stable instance name `{layout}_{api}_{index}`.
    pub fn name(&self) -> String {
        format!(
            "{}_{}_{}",
            layout_to_string(self.layout),
            self.api.as_str(),
            self.index
        )
    }
}

/// Cartesian product `cases x layouts x apis`, API varying fastest.
pub fn expand(
    cases: &[BnTestCase],
    layouts: &[Layout4D],
    apis: &[ApiSelector],
) -> Vec<TestParams> {
    let mut params = Vec::with_capacity(cases.len() * layouts.len() * apis.len());
    for case in cases {
        for &layout in layouts {
            for api in apis {
                params.push(TestParams {
                    case: *case,
                    layout,
                    api: api.clone(),
                    index: params.len(),
                });
            }
        }
    }
    params
}
