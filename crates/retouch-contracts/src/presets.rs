//! Instruction templates for one-click edits, slider adjustments and the
//! rotating hints shown while an animation renders.

pub const CUSTOM_FILTER_LABEL: &str = "Custom Filter";
pub const CUSTOM_ADJUSTMENTS_LABEL: &str = "Custom Adjustments";

/// Instruction + history label pair handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub instruction: String,
    pub label: String,
}

impl EditRequest {
    pub fn new(instruction: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetGroup {
    Enhancement,
    Filter,
    Transform,
    Resize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub group: PresetGroup,
    pub instruction: &'static str,
}

impl EditPreset {
    pub fn request(&self) -> EditRequest {
        EditRequest::new(self.instruction, self.label)
    }
}

macro_rules! crop_instruction {
    ($target:literal) => {
        concat!(
            "Crop the image to a ",
            $target,
            ". Intelligently frame the most important part of the image, ensuring the main subject is centered and well-composed."
        )
    };
}

pub const EDIT_PRESETS: &[EditPreset] = &[
    EditPreset {
        id: "quality",
        label: "Enhance Quality",
        group: PresetGroup::Enhancement,
        instruction: "Enhance the quality of this image. Make it sharper, clearer, and with better resolution, as if it were taken with a professional camera. Fix any compression artifacts.",
    },
    EditPreset {
        id: "sharpen",
        label: "Sharpen",
        group: PresetGroup::Enhancement,
        instruction: "Sharpen the image, focusing on the main subject. Make the details crisper without adding excessive noise.",
    },
    EditPreset {
        id: "invert",
        label: "Invert",
        group: PresetGroup::Enhancement,
        instruction: "Invert the colors of the image.",
    },
    EditPreset {
        id: "redeye",
        label: "Red-Eye Removal",
        group: PresetGroup::Filter,
        instruction: "Remove any red-eye effect from the eyes of the people in this photo.",
    },
    EditPreset {
        id: "blur",
        label: "Blur",
        group: PresetGroup::Filter,
        instruction: "Apply a gentle gaussian blur to the entire image to soften it.",
    },
    EditPreset {
        id: "vintage",
        label: "Vintage",
        group: PresetGroup::Filter,
        instruction: "Apply a vintage film effect to this image, with slightly faded colors, warm tones, and subtle grain.",
    },
    EditPreset {
        id: "bw",
        label: "Black & White",
        group: PresetGroup::Filter,
        instruction: "Convert this image to a high-contrast, dramatic black and white.",
    },
    EditPreset {
        id: "watercolor",
        label: "Watercolor",
        group: PresetGroup::Filter,
        instruction: "Transform this image to look like a watercolor painting.",
    },
    EditPreset {
        id: "oil_painting",
        label: "Oil Painting",
        group: PresetGroup::Filter,
        instruction: "Transform this image to look like an oil painting.",
    },
    EditPreset {
        id: "cartoon",
        label: "Cartoon",
        group: PresetGroup::Filter,
        instruction: "Convert this image into a fun, vibrant cartoon style with bold outlines.",
    },
    EditPreset {
        id: "manga",
        label: "Manga",
        group: PresetGroup::Filter,
        instruction: "Redraw this image in a dramatic black and white manga art style, with screentones and sharp lines.",
    },
    EditPreset {
        id: "rotate_left",
        label: "Rotate Left",
        group: PresetGroup::Transform,
        instruction: "Rotate the image 90 degrees counter-clockwise.",
    },
    EditPreset {
        id: "rotate_right",
        label: "Rotate Right",
        group: PresetGroup::Transform,
        instruction: "Rotate the image 90 degrees clockwise.",
    },
    EditPreset {
        id: "square",
        label: "Square (1:1)",
        group: PresetGroup::Resize,
        instruction: crop_instruction!("1:1 square aspect ratio"),
    },
    EditPreset {
        id: "portrait_sm",
        label: "Portrait (4:5)",
        group: PresetGroup::Resize,
        instruction: crop_instruction!("4:5 vertical aspect ratio"),
    },
    EditPreset {
        id: "story",
        label: "Story (9:16)",
        group: PresetGroup::Resize,
        instruction: crop_instruction!("9:16 vertical aspect ratio, suitable for a story"),
    },
    EditPreset {
        id: "landscape",
        label: "Landscape (16:9)",
        group: PresetGroup::Resize,
        instruction: crop_instruction!("16:9 landscape aspect ratio"),
    },
];

pub fn find_preset(id: &str) -> Option<&'static EditPreset> {
    let normalized = id.trim().to_ascii_lowercase();
    EDIT_PRESETS.iter().find(|preset| preset.id == normalized)
}

pub fn custom_filter(text: &str) -> Option<EditRequest> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(EditRequest::new(trimmed, CUSTOM_FILTER_LABEL))
}

/// Angle 0 is not an edit.
pub fn straighten(angle: i32) -> Option<EditRequest> {
    if angle == 0 {
        return None;
    }
    Some(EditRequest::new(
        format!(
            "Straighten the image by rotating it exactly {angle} degrees. Keep the entire image visible by adding a subtle, context-aware background to fill the corners created by the rotation. Do not crop the image."
        ),
        format!("Straighten: {angle}°"),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Exposure,
    Brightness,
    Contrast,
    Saturation,
    Temperature,
    Highlights,
    Shadows,
}

impl Adjustment {
    pub const ALL: [Adjustment; 7] = [
        Self::Exposure,
        Self::Brightness,
        Self::Contrast,
        Self::Saturation,
        Self::Temperature,
        Self::Highlights,
        Self::Shadows,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|item| item.key() == normalized)
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Exposure => "exposure",
            Self::Brightness => "brightness",
            Self::Contrast => "contrast",
            Self::Saturation => "saturation",
            Self::Temperature => "temperature",
            Self::Highlights => "highlights",
            Self::Shadows => "shadows",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Exposure => "Exposure",
            Self::Brightness => "Brightness",
            Self::Contrast => "Contrast",
            Self::Saturation => "Saturation",
            Self::Temperature => "Temperature",
            Self::Highlights => "Highlights",
            Self::Shadows => "Shadows",
        }
    }

    fn sentence(self, value: i32) -> String {
        let intensity = (f64::from(value.abs()) / 100.0 * 30.0).round() as i64;
        let up = value > 0;
        match self {
            Self::Exposure => format!(
                "Adjust the exposure, making the image {} by about {intensity}%.",
                if up { "brighter" } else { "darker" }
            ),
            Self::Brightness => format!(
                "Adjust the brightness, making the image {} by about {intensity}%.",
                if up { "brighter" } else { "darker" }
            ),
            Self::Contrast => format!(
                "{} the contrast by about {intensity}%.",
                if up { "Increase" } else { "Decrease" }
            ),
            Self::Saturation => format!(
                "{} the color saturation by about {intensity}%, making the colors {}.",
                if up { "Increase" } else { "Decrease" },
                if up { "more vibrant" } else { "more muted" }
            ),
            Self::Temperature => format!(
                "Adjust the color temperature to be about {intensity}% {}.",
                if up { "warmer" } else { "cooler" }
            ),
            Self::Highlights => format!(
                "{} the highlights by about {intensity}% to {}.",
                if up { "Brighten" } else { "Darken" },
                if up { "add punch" } else { "recover details" }
            ),
            Self::Shadows => format!(
                "{} the shadows by about {intensity}% to {}.",
                if up { "Brighten" } else { "Darken" },
                if up { "reveal details" } else { "increase depth" }
            ),
        }
    }
}

/// Slider positions in -100..=100, one per [`Adjustment`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adjustments {
    values: [i32; 7],
}

impl Adjustments {
    pub fn set(&mut self, adjustment: Adjustment, value: i32) {
        self.values[adjustment as usize] = value.clamp(-100, 100);
    }

    pub fn get(&self, adjustment: Adjustment) -> i32 {
        self.values[adjustment as usize]
    }

    /// One sentence per non-zero slider, in declaration order. All zero
    /// yields no edit.
    pub fn to_request(&self) -> Option<EditRequest> {
        let mut sentences = Vec::new();
        let mut parts = Vec::new();
        for adjustment in Adjustment::ALL {
            let value = self.get(adjustment);
            if value == 0 {
                continue;
            }
            sentences.push(adjustment.sentence(value));
            let sign = if value > 0 { "+" } else { "" };
            parts.push(format!("{}: {sign}{value}", adjustment.label()));
        }
        if sentences.is_empty() {
            return None;
        }
        Some(EditRequest::new(
            sentences.join(" "),
            format!("{CUSTOM_ADJUSTMENTS_LABEL}: {}", parts.join(", ")),
        ))
    }
}

pub const ANIMATION_TIPS: &[&str] = &[
    "Try simple prompts like \"gentle zoom in\" or \"subtle parallax effect\".",
    "Describe movements like \"clouds drifting slowly\" or \"leaves rustling in the wind\".",
    "Video generation is a complex task; thanks for your patience!",
    "Higher resolution images can sometimes lead to more detailed animations.",
    "Experiment with different prompts on the same image for varied results.",
];

pub fn animation_tip_message(tip: &str) -> String {
    format!("Tip: {tip}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_lookup_is_case_insensitive() {
        let sharpen = find_preset(" Sharpen ").map(EditPreset::request);
        assert_eq!(
            sharpen,
            Some(EditRequest::new(
                "Sharpen the image, focusing on the main subject. Make the details crisper without adding excessive noise.",
                "Sharpen"
            ))
        );
        assert!(find_preset("sepia").is_none());
    }

    #[test]
    fn crop_presets_expand_target_ratio() {
        let story = find_preset("story").unwrap();
        assert_eq!(
            story.instruction,
            "Crop the image to a 9:16 vertical aspect ratio, suitable for a story. Intelligently frame the most important part of the image, ensuring the main subject is centered and well-composed."
        );
        let resize_count = EDIT_PRESETS
            .iter()
            .filter(|preset| preset.group == PresetGroup::Resize)
            .count();
        assert_eq!(resize_count, 4);
    }

    #[test]
    fn adjustments_build_instruction_and_label_in_slider_order() {
        let mut adjustments = Adjustments::default();
        assert_eq!(adjustments.to_request(), None);

        adjustments.set(Adjustment::Contrast, -10);
        adjustments.set(Adjustment::Exposure, 20);
        let request = adjustments.to_request().unwrap();
        assert_eq!(
            request.instruction,
            "Adjust the exposure, making the image brighter by about 6%. Decrease the contrast by about 3%."
        );
        assert_eq!(request.label, "Custom Adjustments: Exposure: +20, Contrast: -10");
    }

    #[test]
    fn adjustments_clamp_and_round_intensity() {
        let mut adjustments = Adjustments::default();
        adjustments.set(Adjustment::Shadows, -250);
        assert_eq!(adjustments.get(Adjustment::Shadows), -100);
        adjustments.set(Adjustment::Temperature, 5);
        let request = adjustments.to_request().unwrap();
        assert_eq!(
            request.instruction,
            "Adjust the color temperature to be about 2% warmer. Darken the shadows by about 30% to increase depth."
        );
        assert_eq!(Adjustment::parse("HIGHLIGHTS"), Some(Adjustment::Highlights));
    }

    #[test]
    fn straighten_and_custom_filter_skip_empty_input() {
        assert_eq!(straighten(0), None);
        let request = straighten(-5).unwrap();
        assert!(request.instruction.contains("exactly -5 degrees"));
        assert_eq!(request.label, "Straighten: -5°");

        assert_eq!(custom_filter("   "), None);
        assert_eq!(
            custom_filter(" make it pop "),
            Some(EditRequest::new("make it pop", CUSTOM_FILTER_LABEL))
        );
    }
}
