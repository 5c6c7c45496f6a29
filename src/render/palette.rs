/// Steel blue, used for every historical series.
pub const HISTORICAL_COLOR: Rgb = Rgb::new(0x46, 0x82, 0xB4);

const BASE_HUE: f64 = 147.0;
const GOLDEN_ANGLE: f64 = 137.508;
const SERIES_SATURATION: f64 = 0.55;
const SERIES_LIGHTNESS: f64 = 0.45;

const NEGATIVE_COLOR: Rgb = Rgb::new(0xFF, 0x00, 0x00);
const NEUTRAL_COLOR: Rgb = Rgb::new(0xD3, 0xD3, 0xD3);
const POSITIVE_COLOR: Rgb = Rgb::new(0x00, 0x00, 0xFF);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

/// HSL to RGB; `h` in degrees, `s` and `l` in `0..=1`.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> Rgb {
    let h = h.rem_euclid(360.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb::new(channel(r), channel(g), channel(b))
}

/// Colour of the `index`-th prediction series. Hues step by the golden angle
/// so neighbouring series stay distinguishable however many there are.
pub fn series_color(index: usize) -> Rgb {
    let hue = (BASE_HUE + index as f64 * GOLDEN_ANGLE) % 360.0;
    hsl_to_rgb(hue, SERIES_SATURATION, SERIES_LIGHTNESS)
}

/// Red for negative, light gray at zero, blue for positive; `value` is
/// scaled by `max_abs`.
pub fn diverging_color(value: f64, max_abs: f64) -> Rgb {
    if max_abs <= 0.0 || !value.is_finite() {
        return NEUTRAL_COLOR;
    }
    let t = (value / max_abs).clamp(-1.0, 1.0);
    if t < 0.0 {
        NEUTRAL_COLOR.lerp(NEGATIVE_COLOR, -t)
    } else {
        NEUTRAL_COLOR.lerp(POSITIVE_COLOR, t)
    }
}
