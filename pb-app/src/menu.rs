//! Inline-keyboard menu: per-field views and their templates.
//!
//! Every view is plain data. A [`Menu`] is rebuilt from a [`RenderConfig`]
//! whenever a field changes, so the highlighted button always reflects the
//! current value.

use crate::config::LimitsConfig;
use crate::router::Param;
use pb_channels::{Button, Keyboard};
use pb_render::{Extension, RenderConfig, Shape};

pub const MIN_OUTPUT_SIZE: u32 = 256;
pub const MAX_REPEAT: u32 = 6;

pub const ROOT_CALLBACK: &str = "/";
pub const CREATE_CALLBACK: &str = "/create";

const HIGHLIGHT: &str = "👉 ";
const BACK_LABEL: &str = "Back";
const OTHER_LABEL: &str = "Other";
const AUTO_LABEL: &str = "Auto";
const ROOT_TEXT: &str = "Menu:";

const ITERATION_PICKS: [u32; 6] = [100, 200, 400, 800, 1000, 2000];
const ALPHA_PICKS: [u8; 4] = [32, 64, 128, 255];
const SIZE_PICKS: [u32; 6] = [256, 512, 720, 1024, 1280, 1920];
/// gif output is accepted but not offered; it renders far slower than the rest.
const OFFERED_EXTENSIONS: [Extension; 3] = [Extension::Jpg, Extension::Png, Extension::Svg];

/// One editable setting of a [`RenderConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Shape,
    Iterations,
    Repeat,
    Alpha,
    Extension,
    Size,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Shape,
        Field::Iterations,
        Field::Repeat,
        Field::Alpha,
        Field::Extension,
        Field::Size,
    ];

    /// Path segment used in callback data.
    pub fn slug(self) -> &'static str {
        match self {
            Field::Shape => "shape",
            Field::Iterations => "iter",
            Field::Repeat => "rep",
            Field::Alpha => "alpha",
            Field::Extension => "ext",
            Field::Size => "size",
        }
    }

    fn position(self) -> usize {
        match self {
            Field::Shape => 0,
            Field::Iterations => 1,
            Field::Repeat => 2,
            Field::Alpha => 3,
            Field::Extension => 4,
            Field::Size => 5,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Field::Shape => "Shapes",
            Field::Iterations => "Iterations",
            Field::Repeat => "Repetitions",
            Field::Alpha => "Alpha",
            Field::Extension => "Extension",
            Field::Size => "Size",
        }
    }

    fn text(self) -> &'static str {
        match self {
            Field::Shape => "Choose the shapes the image will be built from:",
            Field::Iterations => {
                "Choose the number of iterations, the steps on each of which shapes are drawn:"
            }
            Field::Repeat => "Choose how many shapes are drawn on each iteration:",
            Field::Alpha => "Choose the alpha-channel value of every drawn shape:",
            Field::Extension => "Choose the file extension:",
            Field::Size => {
                "Choose the size of the longer side of the image (the aspect ratio is kept):"
            }
        }
    }

    pub fn view_callback(self) -> String {
        format!("/settings/{}", self.slug())
    }

    pub fn option_callback(self, value: impl std::fmt::Display) -> String {
        format!("/settings/{}/{value}", self.slug())
    }

    /// Callback of the "Other" button, for fields that take free-form input.
    pub fn input_callback(self) -> Option<String> {
        matches!(self, Field::Iterations | Field::Alpha | Field::Size)
            .then(|| format!("/settings/{}/input", self.slug()))
    }

    /// Inclusive range a typed-in value must fall in.
    pub fn input_bounds(self, limits: &LimitsConfig) -> Option<(i64, i64)> {
        match self {
            Field::Iterations => Some((1, i64::from(limits.max_iterations))),
            Field::Alpha => Some((1, i64::from(u8::MAX))),
            Field::Size => Some((i64::from(MIN_OUTPUT_SIZE), i64::from(limits.max_size))),
            Field::Shape | Field::Repeat | Field::Extension => None,
        }
    }

    /// Returns `config` with this field set to `param`, or `None` when the
    /// value is out of range for the field.
    pub fn apply(
        self,
        mut config: RenderConfig,
        param: &Param,
        limits: &LimitsConfig,
    ) -> Option<RenderConfig> {
        match (self, param) {
            (Field::Shape, Param::Int(n)) => config.shape = Shape::from_index(*n)?,
            (Field::Iterations, Param::Int(n)) => {
                config.iterations = in_range(*n, 1, limits.max_iterations)?;
            }
            (Field::Repeat, Param::Int(n)) => config.repeat = in_range(*n, 1, MAX_REPEAT)?,
            (Field::Alpha, Param::Int(n)) => config.alpha = u8::try_from(*n).ok()?,
            (Field::Extension, Param::Slug(s)) => config.extension = s.parse().ok()?,
            (Field::Size, Param::Int(n)) => {
                config.output_size = in_range(*n, MIN_OUTPUT_SIZE, limits.max_size)?;
            }
            _ => return None,
        }
        Some(config)
    }

    /// The current value of this field as it appears in callback data.
    pub fn current_value(self, config: &RenderConfig) -> String {
        match self {
            Field::Shape => config.shape.index().to_string(),
            Field::Iterations => config.iterations.to_string(),
            Field::Repeat => config.repeat.to_string(),
            Field::Alpha => config.alpha.to_string(),
            Field::Extension => config.extension.to_string(),
            Field::Size => config.output_size.to_string(),
        }
    }

    /// The unhighlighted view of this field.
    pub fn template(self, limits: &LimitsConfig) -> View {
        let pick = |label: String, value: String| Button::new(label, self.option_callback(value));
        let mut rows: Vec<Vec<Button>> = match self {
            Field::Shape => Shape::ALL
                .iter()
                .map(|shape| vec![pick(shape.label().to_string(), shape.index().to_string())])
                .collect(),
            Field::Iterations => ITERATION_PICKS
                .iter()
                .filter(|n| **n <= limits.max_iterations)
                .map(|n| pick(n.to_string(), n.to_string()))
                .collect::<Vec<_>>()
                .chunks(3)
                .map(<[Button]>::to_vec)
                .collect(),
            Field::Repeat => (1..=MAX_REPEAT)
                .map(|n| pick(n.to_string(), n.to_string()))
                .collect::<Vec<_>>()
                .chunks(3)
                .map(<[Button]>::to_vec)
                .collect(),
            Field::Alpha => vec![
                vec![pick(AUTO_LABEL.to_string(), "0".to_string())],
                ALPHA_PICKS
                    .iter()
                    .map(|n| pick(n.to_string(), n.to_string()))
                    .collect(),
            ],
            Field::Extension => vec![
                OFFERED_EXTENSIONS
                    .iter()
                    .map(|ext| pick(ext.to_string(), ext.to_string()))
                    .collect(),
            ],
            Field::Size => SIZE_PICKS
                .iter()
                .filter(|n| **n <= limits.max_size)
                .map(|n| pick(n.to_string(), n.to_string()))
                .collect::<Vec<_>>()
                .chunks(3)
                .map(<[Button]>::to_vec)
                .collect(),
        };
        if let Some(input) = self.input_callback() {
            rows.push(vec![Button::new(OTHER_LABEL, input)]);
        }
        rows.push(vec![Button::new(BACK_LABEL, ROOT_CALLBACK)]);
        View {
            text: self.text().to_string(),
            keyboard: Keyboard::new(rows),
        }
    }

    /// The view of this field with `config`'s value highlighted.
    pub fn view_for(self, config: &RenderConfig, limits: &LimitsConfig) -> View {
        let template = self.template(limits);
        let selected = self.option_callback(self.current_value(config));
        if template.has_callback(&selected) {
            return template.highlighted(&selected, None);
        }
        match self.input_callback() {
            Some(input) => {
                let label = format!("{OTHER_LABEL} ({})", self.current_value(config));
                template.highlighted(&input, Some(&label))
            }
            None => template,
        }
    }
}

fn in_range(value: i64, min: u32, max: u32) -> Option<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| (min..=max).contains(v))
}

/// Text plus inline keyboard shown in the menu message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub text: String,
    pub keyboard: Keyboard,
}

impl View {
    pub fn root() -> Self {
        let nav = |field: Field| Button::new(field.label(), field.view_callback());
        Self {
            text: ROOT_TEXT.to_string(),
            keyboard: Keyboard::new(vec![
                vec![Button::new("Start", CREATE_CALLBACK)],
                vec![nav(Field::Shape), nav(Field::Iterations)],
                vec![nav(Field::Repeat), nav(Field::Alpha)],
                vec![nav(Field::Extension), nav(Field::Size)],
            ]),
        }
    }

    /// Free-form input prompt with a single Back button.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::new(vec![vec![Button::new(BACK_LABEL, ROOT_CALLBACK)]]),
        }
    }

    /// A copy of this view with the `selected` button marked, and
    /// optionally relabeled.
    pub fn highlighted(&self, selected: &str, label: Option<&str>) -> Self {
        let mut view = self.clone();
        for button in view.keyboard.rows.iter_mut().flatten() {
            if button.callback_data == selected {
                let text = label.unwrap_or(&button.text);
                button.text = format!("{HIGHLIGHT}{text}");
            }
        }
        view
    }

    pub fn has_callback(&self, callback: &str) -> bool {
        self.keyboard.buttons().any(|b| b.callback_data == callback)
    }

    /// Text of the button whose callback is `callback`.
    pub fn button_text(&self, callback: &str) -> Option<&str> {
        self.keyboard
            .buttons()
            .find(|b| b.callback_data == callback)
            .map(|b| b.text.as_str())
    }
}

/// Every view of a session's menu, precomputed for one config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    root: View,
    fields: Vec<View>,
}

impl Menu {
    pub fn new(config: &RenderConfig, limits: &LimitsConfig) -> Self {
        Self {
            root: View::root(),
            fields: Field::ALL
                .iter()
                .map(|field| field.view_for(config, limits))
                .collect(),
        }
    }

    pub fn root(&self) -> &View {
        &self.root
    }

    pub fn field(&self, field: Field) -> &View {
        &self.fields[field.position()]
    }

    #[cfg(test)]
    pub fn views(&self) -> impl Iterator<Item = &View> {
        std::iter::once(&self.root).chain(self.fields.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    #[test]
    fn highlight_marks_only_the_selected_button() {
        let view = Field::Repeat.template(&limits());
        let marked = view.highlighted("/settings/rep/2", None);
        assert_eq!(marked.button_text("/settings/rep/2"), Some("👉 2"));
        assert_eq!(marked.button_text("/settings/rep/3"), Some("3"));
        assert_eq!(view.button_text("/settings/rep/2"), Some("2"));
    }

    #[test]
    fn default_config_highlights_its_quick_picks() {
        let menu = Menu::new(&RenderConfig::default(), &limits());
        assert_eq!(
            menu.field(Field::Shape).button_text("/settings/shape/0"),
            Some("👉 All")
        );
        assert_eq!(
            menu.field(Field::Iterations).button_text("/settings/iter/200"),
            Some("👉 200")
        );
        assert_eq!(
            menu.field(Field::Alpha).button_text("/settings/alpha/128"),
            Some("👉 128")
        );
        assert_eq!(
            menu.field(Field::Extension).button_text("/settings/ext/jpg"),
            Some("👉 jpg")
        );
        assert_eq!(
            menu.field(Field::Size).button_text("/settings/size/1280"),
            Some("👉 1280")
        );
    }

    #[test]
    fn custom_value_highlights_other_with_the_value() {
        let config = RenderConfig {
            iterations: 1234,
            ..RenderConfig::default()
        };
        let view = Menu::new(&config, &limits()).field(Field::Iterations).clone();
        assert_eq!(
            view.button_text("/settings/iter/input"),
            Some("👉 Other (1234)")
        );
        assert!(
            view.keyboard
                .buttons()
                .filter(|b| b.text.starts_with(HIGHLIGHT))
                .count()
                == 1
        );
    }

    #[test]
    fn unoffered_extension_leaves_view_unmarked() {
        let config = RenderConfig {
            extension: Extension::Gif,
            ..RenderConfig::default()
        };
        let view = Field::Extension.view_for(&config, &limits());
        assert!(view.keyboard.buttons().all(|b| !b.text.starts_with(HIGHLIGHT)));
    }

    #[test]
    fn apply_enforces_field_ranges() {
        let base = RenderConfig::default();
        let l = limits();
        assert_eq!(
            Field::Shape.apply(base, &Param::Int(8), &l).map(|c| c.shape),
            Some(Shape::Polygon)
        );
        assert!(Field::Shape.apply(base, &Param::Int(9), &l).is_none());
        assert!(Field::Iterations.apply(base, &Param::Int(0), &l).is_none());
        assert!(Field::Iterations.apply(base, &Param::Int(2001), &l).is_none());
        assert!(Field::Repeat.apply(base, &Param::Int(7), &l).is_none());
        assert!(Field::Alpha.apply(base, &Param::Int(256), &l).is_none());
        assert_eq!(
            Field::Alpha.apply(base, &Param::Int(0), &l).map(|c| c.alpha),
            Some(0)
        );
        assert!(Field::Size.apply(base, &Param::Int(255), &l).is_none());
        assert!(Field::Size.apply(base, &Param::Int(3841), &l).is_none());
        assert_eq!(
            Field::Extension
                .apply(base, &Param::Slug("gif".into()), &l)
                .map(|c| c.extension),
            Some(Extension::Gif)
        );
        assert!(Field::Extension.apply(base, &Param::Int(1), &l).is_none());
        assert!(Field::Shape.apply(base, &Param::Slug("1".into()), &l).is_none());
    }

    #[test]
    fn quick_picks_respect_configured_limits() {
        let l = LimitsConfig {
            max_iterations: 500,
            max_size: 1024,
            ..LimitsConfig::default()
        };
        let iter = Field::Iterations.template(&l);
        assert!(iter.has_callback("/settings/iter/400"));
        assert!(!iter.has_callback("/settings/iter/800"));
        let size = Field::Size.template(&l);
        assert!(size.has_callback("/settings/size/1024"));
        assert!(!size.has_callback("/settings/size/1280"));
        assert_eq!(Field::Size.input_bounds(&l), Some((256, 1024)));
    }

    #[test]
    fn only_numeric_free_form_fields_have_input() {
        assert_eq!(
            Field::Iterations.input_callback().as_deref(),
            Some("/settings/iter/input")
        );
        assert_eq!(Field::Shape.input_callback(), None);
        assert_eq!(Field::Alpha.input_bounds(&limits()), Some((1, 255)));
        assert_eq!(Field::Repeat.input_bounds(&limits()), None);
    }
}
