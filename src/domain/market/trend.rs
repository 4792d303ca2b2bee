use std::fmt;

const CHOPPY_SLOPE: f64 = 0.25;
const MILD_SLOPE: f64 = 0.5;
const STRONG_SLOPE: f64 = 1.0;
const STRONG_FIT: f64 = 0.80;
const LOOSE_FIT: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendSignal {
    Choppy,
    MildBullish,
    MildBearish,
    StrongBullish,
    StrongBearish,
}

impl TrendSignal {
    pub fn is_bullish(&self) -> bool {
        matches!(self, TrendSignal::MildBullish | TrendSignal::StrongBullish)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, TrendSignal::MildBearish | TrendSignal::StrongBearish)
    }

    pub fn is_strong(&self) -> bool {
        matches!(self, TrendSignal::StrongBullish | TrendSignal::StrongBearish)
    }
}

impl fmt::Display for TrendSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendSignal::Choppy => write!(f, "choppy"),
            TrendSignal::MildBullish => write!(f, "mild bullish"),
            TrendSignal::MildBearish => write!(f, "mild bearish"),
            TrendSignal::StrongBullish => write!(f, "strong bullish"),
            TrendSignal::StrongBearish => write!(f, "strong bearish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub signal: TrendSignal,
    pub slope: f64,
    pub r_squared: f64,
}

impl Trend {
    fn choppy() -> Self {
        Self {
            signal: TrendSignal::Choppy,
            slope: 0.0,
            r_squared: 0.0,
        }
    }
}

/// Fits a least-squares line over `(index, value)` and grades the trend by
/// slope magnitude and fit quality. Degenerate inputs grade as choppy.
pub fn analyze(values: &[f64]) -> Trend {
    let n = values.len();
    if n < 2 {
        return Trend::choppy();
    }

    let nf = n as f64;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let denom = nf * sxx - sx * sx;
    if denom == 0.0 {
        return Trend::choppy();
    }
    let slope = (nf * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / nf;

    let mean = sy / nf;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let fitted = slope * i as f64 + intercept;
        ss_res += (y - fitted) * (y - fitted);
        ss_tot += (y - mean) * (y - mean);
    }
    if ss_tot == 0.0 {
        return Trend::choppy();
    }
    let r_squared = (1.0 - ss_res / ss_tot).clamp(0.0, 1.0);

    Trend {
        signal: grade(slope, r_squared),
        slope,
        r_squared,
    }
}

fn grade(slope: f64, r_squared: f64) -> TrendSignal {
    let magnitude = slope.abs();
    let bullish = slope > 0.0;

    if magnitude < CHOPPY_SLOPE {
        return TrendSignal::Choppy;
    }
    if r_squared < STRONG_FIT && magnitude < MILD_SLOPE {
        return if bullish {
            TrendSignal::MildBullish
        } else {
            TrendSignal::MildBearish
        };
    }
    let strong = (r_squared > STRONG_FIT && magnitude > MILD_SLOPE)
        || (r_squared > LOOSE_FIT && r_squared < STRONG_FIT && magnitude > STRONG_SLOPE);
    if strong {
        return if bullish {
            TrendSignal::StrongBullish
        } else {
            TrendSignal::StrongBearish
        };
    }
    TrendSignal::Choppy
}
