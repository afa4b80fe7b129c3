use image::Rgb;

/// Number of components the cloth checkpoint distinguishes (background, upper body,
/// lower body, full body).
pub const CLOTH_COMPONENTS: usize = 4;

/// Fixed color table for segmentation class indices.
///
/// Colors follow the PASCAL VOC scheme: the bits of the class index are spread
/// across the high bits of the red, green and blue channels, so neighbouring
/// classes get clearly different colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgb<u8>>,
}

impl Palette {
    /// Class indices are stored as `u8`, so at most 256 entries are generated.
    pub fn new(num_classes: usize) -> Self {
        let colors = (0..num_classes.min(256))
            .map(|class| {
                let mut label = class;
                let mut shift = 7;
                let mut color = [0u8; 3];
                while label > 0 {
                    for (channel, value) in color.iter_mut().enumerate() {
                        *value |= (((label >> channel) & 1) << shift) as u8;
                    }
                    shift -= 1;
                    label >>= 3;
                }
                Rgb(color)
            })
            .collect();
        Self { colors }
    }

    /// Indices past the end of the table render as black, like an unset entry of an
    /// indexed image.
    pub fn color(&self, index: u8) -> Rgb<u8> {
        self.colors
            .get(usize::from(index))
            .copied()
            .unwrap_or(Rgb([0, 0, 0]))
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new(CLOTH_COMPONENTS)
    }
}
