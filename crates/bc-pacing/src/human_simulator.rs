//! Pure, stateless-except-for-RNG delay calculation meant to approximate
//! how a human operator paces sends.

use std::time::Duration;

use rand::Rng;

use bc_common::types::ChannelAge;

const TYPING_MIN: Duration = Duration::from_secs(2);
const TYPING_MAX: Duration = Duration::from_secs(30);

/// Independently-drawn components of one simulated human delay. Callers may
/// pre-position some components before `send` and others after; this type
/// just carries the numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayComponents {
    pub typing: Duration,
    pub second_thoughts: Duration,
    pub phone_check: Duration,
    pub distraction: Duration,
    pub forgot: Duration,
    pub typo_correction: Duration,
}

impl DelayComponents {
    pub fn total(&self) -> Duration {
        self.typing + self.second_thoughts + self.phone_check + self.distraction + self.forgot + self.typo_correction
    }
}

/// Composes a `DelayComponents` for one message. `forgot_allowed` gates the
/// rare "forgot" pause, which the caller must throttle to at most once per
/// campaign per hour.
pub fn compose_delay(message: &str, forgot_allowed: bool) -> DelayComponents {
    let mut rng = rand::thread_rng();

    DelayComponents {
        typing: typing_time(message, &mut rng),
        second_thoughts: bernoulli_pause(&mut rng, 0.05, 3.0, 8.0),
        phone_check: bernoulli_pause(&mut rng, 0.10, 5.0, 15.0),
        distraction: bernoulli_pause(&mut rng, 0.08, 10.0, 30.0),
        forgot: if forgot_allowed { bernoulli_pause(&mut rng, 0.03, 1800.0, 3600.0) } else { Duration::ZERO },
        typo_correction: bernoulli_pause(&mut rng, 0.15, 1.0, 4.0),
    }
}

fn typing_time(message: &str, rng: &mut impl Rng) -> Duration {
    let chars = message.chars().count() as f64;
    let cps = rng.gen_range(3.0..=5.0);
    let mut secs = chars / cps;

    for ch in message.chars() {
        if ch.is_ascii_punctuation() {
            secs += rng.gen_range(0.2..=0.5);
        } else if ch == ' ' {
            secs += rng.gen_range(0.05..=0.2);
        }
    }

    let clamped = secs.clamp(TYPING_MIN.as_secs_f64(), TYPING_MAX.as_secs_f64());
    Duration::from_secs_f64(clamped)
}

fn bernoulli_pause(rng: &mut impl Rng, probability: f64, min_secs: f64, max_secs: f64) -> Duration {
    if rng.gen_bool(probability) {
        Duration::from_secs_f64(rng.gen_range(min_secs..=max_secs))
    } else {
        Duration::ZERO
    }
}

/// Channel-age is accepted for forward compatibility with callers that key
/// pacing decisions off it, but `compose_delay` itself has no age-dependent
/// term per the current contract.
pub fn compose_delay_for_age(_age: ChannelAge, message: &str, forgot_allowed: bool) -> DelayComponents {
    compose_delay(message, forgot_allowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_time_is_clamped_to_bounds() {
        let mut rng = rand::thread_rng();
        let short = typing_time("hi", &mut rng);
        assert!(short >= TYPING_MIN);

        let long_message = "a".repeat(2000);
        let long = typing_time(&long_message, &mut rng);
        assert!(long <= TYPING_MAX);
    }

    #[test]
    fn forgot_disallowed_is_always_zero() {
        for _ in 0..200 {
            let components = compose_delay("hello there", false);
            assert_eq!(components.forgot, Duration::ZERO);
        }
    }
}
