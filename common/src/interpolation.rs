use chrono::NaiveDateTime;

use crate::{channel::Channel, schedule::ResolvedPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTarget {
    pub output: u16,
    pub missing_value: bool,
    pub zero_span: bool,
}

pub fn compute(
    now: NaiveDateTime,
    previous: &ResolvedPoint<'_>,
    next: &ResolvedPoint<'_>,
    channel: &Channel,
) -> ChannelTarget {
    if !channel.is_enabled() {
        return ChannelTarget {
            output: 0,
            missing_value: false,
            zero_span: false,
        };
    }

    let id = channel.id();
    let previous_value = previous.point.value_for(id);
    let next_value = next.point.value_for(id);
    let previous_percent = f64::from(previous_value.unwrap_or(0));
    let next_percent = f64::from(next_value.unwrap_or(0));

    let mut zero_span = false;
    let mut missing_value = previous_value.is_none();

    let percent = if !next.point.fade {
        previous_percent
    } else {
        missing_value |= next_value.is_none();
        match span_minutes(previous, next) {
            0 => {
                zero_span = true;
                next_percent
            }
            total => {
                let elapsed = (now - previous.at).num_minutes() as f64;
                let fraction = (elapsed / total as f64).clamp(0.0, 1.0);
                previous_percent + (next_percent - previous_percent) * fraction
            }
        }
    };

    ChannelTarget {
        output: channel.scale_percent(percent),
        missing_value,
        zero_span,
    }
}

pub fn span_minutes(previous: &ResolvedPoint<'_>, next: &ResolvedPoint<'_>) -> i64 {
    if previous.index == next.index {
        return 0;
    }
    (next.at - previous.at).num_minutes().max(0)
}
