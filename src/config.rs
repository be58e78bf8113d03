//! Layer descriptions as supplied by the host's configuration.
//!
//! A [`LayerParameter`] is the JSON form of one layer entry in a net
//! definition. The `type` field selects the layer, and layer-specific settings
//! live in a nested `*_param` object:
//!
//! ```json
//! {
//!   "name": "loss_bbox",
//!   "type": "SmoothL1Loss",
//!   "bottom": ["bbox_pred", "bbox_targets", "bbox_inside_weights", "bbox_outside_weights"],
//!   "top": ["loss_bbox"],
//!   "loss_weight": [1.0],
//!   "smooth_l1_loss_param": { "sigma": 3.0 }
//! }
//! ```
//!
//! Omitted fields take their defaults (`sigma = 1.0`, weights inferred from the
//! number of bottoms, loss weight `1.0` for loss layers).

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::layers::WeightMode;

fn default_sigma() -> f64 {
    1.0
}

/// Settings of the `SmoothL1Loss` layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothL1LossParameter {
    /// Controls the knee of the loss, which sits at `1 / sigma²`.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Explicit weight mode. Inferred from the bottom count when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightMode>,
}

impl Default for SmoothL1LossParameter {
    fn default() -> Self {
        Self {
            sigma: default_sigma(),
            weights: None,
        }
    }
}

/// The layer type and its type-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    /// Elementwise rounding.
    Round,
    /// Smoothed-L1 loss.
    SmoothL1Loss {
        #[serde(default)]
        smooth_l1_loss_param: SmoothL1LossParameter,
    },
}

impl LayerKind {
    /// The registered type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Round => "Round",
            Self::SmoothL1Loss { .. } => "SmoothL1Loss",
        }
    }
}

/// One layer entry of a net definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParameter {
    /// Name of the layer, used in log and error messages.
    #[serde(default)]
    pub name: String,
    /// Layer type and settings.
    #[serde(flatten)]
    pub kind: LayerKind,
    /// Names of the bottom blobs. Only the host interprets these.
    #[serde(default)]
    pub bottom: Vec<String>,
    /// Names of the top blobs. Only the host interprets these.
    #[serde(default)]
    pub top: Vec<String>,
    /// Loss weight per top. Empty means the layer's default.
    #[serde(default)]
    pub loss_weight: Vec<f64>,
}

impl LayerParameter {
    /// A parameter with the given name and kind and everything else defaulted.
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bottom: Vec::new(),
            top: Vec::new(),
            loss_weight: Vec::new(),
        }
    }

    /// Parses a layer entry from JSON.
    ///
    /// # Errors
    /// Returns [`LayerError::Parse`] for malformed JSON or an unknown `type`.
    ///
    /// # Example
    /// ```rust
    /// use blob_layers::config::{LayerKind, LayerParameter};
    ///
    /// let param = LayerParameter::from_json(r#"{ "name": "quantize", "type": "Round" }"#).unwrap();
    /// assert_eq!(param.kind, LayerKind::Round);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, LayerError> {
        let param: Self = serde_json::from_str(json)?;
        log::debug!("parsed {} layer `{}`", param.kind.type_name(), param.name);
        Ok(param)
    }

    /// Parses a list of layer entries from a JSON array.
    ///
    /// # Errors
    /// Returns [`LayerError::Parse`] if any entry is malformed.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>, LayerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialises the entry back to JSON.
    ///
    /// # Errors
    /// Returns [`LayerError::Parse`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, LayerError> {
        Ok(serde_json::to_string(self)?)
    }
}
