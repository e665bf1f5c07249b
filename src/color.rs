use crate::cli::ColorMode;
use lazy_static::lazy_static;
use nu_ansi_term::{AnsiString, Color, Style};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

lazy_static! {
    pub(crate) static ref MODEL_LABEL: Style = Color::Green.bold();
    pub(crate) static ref USAGE_TEXT: Style = Style::new().dimmed();
    pub(crate) static ref ESTIMATE_TAG: Style = Color::Yellow.normal();
    pub(crate) static ref ERROR_INDICATOR: Style = Color::Red.bold();
    pub(crate) static ref WARNING_INDICATOR: Style = Color::Yellow.bold();
    pub(crate) static ref ERROR_TEXT: Style = Color::Default.bold();
    pub(crate) static ref WARNING_TEXT: Style = Color::Default.bold();
}

static USE_COLOR: AtomicBool = AtomicBool::new(true);

pub(crate) fn configure_color(cmode: ColorMode) {
    USE_COLOR.store(matches!(cmode, ColorMode::On), Ordering::Relaxed);
}

pub(crate) fn color_mode() -> ColorMode {
    match USE_COLOR.load(Ordering::Relaxed) {
        true => ColorMode::On,
        false => ColorMode::Off,
    }
}

pub(crate) trait MaybePaint {
    /// Paint `input` when color output is enabled, pass it through otherwise.
    #[must_use]
    fn maybe_paint<'a, I: Into<Cow<'a, str>>>(self, input: I) -> AnsiString<'a>;
}

impl MaybePaint for Style {
    fn maybe_paint<'a, I: Into<Cow<'a, str>>>(self, input: I) -> AnsiString<'a> {
        let text: Cow<'a, str> = input.into();

        match color_mode() {
            ColorMode::On => self.paint(text),
            ColorMode::Off => AnsiString::from(text),
        }
    }
}
