//! Sunrise/sunset and civil-twilight calculation for the time-of-day
//! privacy filter.
//!
//! Uses the standard NOAA approximation (solar declination + equation
//! of time); accurate to a couple of minutes, which is well within
//! tolerance for a "night only" gate. Results are cached per calendar
//! day by the caller.

use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate, Timelike};

/// Civil dawn and dusk for `date` at `(lat, lon)`, in minutes since UTC
/// midnight. Returns `None` for latitudes experiencing civil
/// polar day/night on that date (treated as "always day").
pub fn civil_twilight_utc_minutes(lat: f64, lon: f64, date: NaiveDate) -> Option<(f64, f64)> {
    let day_of_year = date.ordinal() as f64;
    let gamma = 2.0 * PI / 365.0 * (day_of_year - 1.0);

    // Equation of time, in minutes.
    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos() - 0.032077 * gamma.sin() - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());

    // Solar declination, in radians.
    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin() - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    // Civil twilight: sun 6 degrees below the horizon.
    let zenith = 96.0_f64.to_radians();
    let lat_rad = lat.to_radians();

    let cos_hour_angle = (zenith.cos() / (lat_rad.cos() * decl.cos())) - (lat_rad.tan() * decl.tan());
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }
    let hour_angle = cos_hour_angle.acos().to_degrees();

    let solar_noon_utc_minutes = 720.0 - 4.0 * lon - eqtime;
    let dawn = solar_noon_utc_minutes - 4.0 * hour_angle;
    let dusk = solar_noon_utc_minutes + 4.0 * hour_angle;
    Some((dawn, dusk))
}

/// True if `wall_clock_ms` (UTC epoch millis) falls between civil dusk
/// and civil dawn at `(lat, lon)`.
pub fn is_night(lat: f64, lon: f64, wall_clock_ms: i64) -> bool {
    let datetime = match chrono::DateTime::from_timestamp_millis(wall_clock_ms) {
        Some(dt) => dt,
        None => return false,
    };
    let date = datetime.date_naive();
    let minutes_of_day = datetime.time().num_seconds_from_midnight() as f64 / 60.0;

    match civil_twilight_utc_minutes(lat, lon, date) {
        Some((dawn, dusk)) => minutes_of_day < dawn || minutes_of_day > dusk,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn equator_twilight_is_roughly_twelve_hours_apart() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let (dawn, dusk) = civil_twilight_utc_minutes(0.0, 0.0, date).unwrap();
        assert!((dusk - dawn - 720.0).abs() < 30.0);
    }

    #[test]
    fn noon_is_never_night_at_the_equator() {
        let noon_ms = NaiveDate::from_ymd_opt(2026, 6, 21)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert!(!is_night(0.0, 0.0, noon_ms));
    }

    #[test]
    fn midnight_is_night_at_the_equator() {
        let midnight_ms = NaiveDate::from_ymd_opt(2026, 6, 21)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert!(is_night(0.0, 0.0, midnight_ms));
    }
}
