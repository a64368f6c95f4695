use std::fmt;

/// Memory layout of the 4D activation tensors in a graph.
///
/// The layout determines which two axes of a tensor are spatial (height and
/// width) and therefore which elements of a per-axis stride vector describe
/// spatial subsampling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Layout {
    /// Batch, channels, height, width.
    #[cfg_attr(feature = "serde", serde(rename = "NCHW"))]
    Nchw,
    /// Batch, height, width, channels.
    #[cfg_attr(feature = "serde", serde(rename = "NHWC"))]
    Nhwc,
}

impl Layout {
    /// Parse a graph-level layout name.
    ///
    /// Returns `None` for anything other than `"NCHW"` or `"NHWC"`.
    pub fn parse(name: &str) -> Option<Layout> {
        match name {
            "NCHW" => Some(Layout::Nchw),
            "NHWC" => Some(Layout::Nhwc),
            _ => None,
        }
    }

    /// Return the indices of the height and width axes.
    pub fn spatial_dims(self) -> [usize; 2] {
        match self {
            Layout::Nchw => [2, 3],
            Layout::Nhwc => [1, 2],
        }
    }

    /// Return the index of the channel axis.
    pub fn channel_dim(self) -> usize {
        match self {
            Layout::Nchw => 1,
            Layout::Nhwc => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Layout::Nchw => "NCHW",
            Layout::Nhwc => "NHWC",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
