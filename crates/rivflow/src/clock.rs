//! Simulation calendar.
//!
//! Four nested counters: second-of-day, day-of-month, month, year. The
//! external data sets the model was built for span 1968-2009, so the
//! mod-4 leap rule is applied inside that window only and the clock
//! reports when a run walks off the supported range.

const MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Last calendar year the historical forcing data covers
pub const LAST_SUPPORTED_YEAR: i32 = 2009;

/// Leap years as the legacy data sets define them
pub fn is_leap_year(year: i32) -> bool {
    (1968..=LAST_SUPPORTED_YEAR).contains(&year) && year % 4 == 0
}

pub fn days_in_year(year: i32) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    debug_assert!((1..=12).contains(&month));
    if month == 2 && is_leap_year(year) {
        29
    } else {
        MONTH_DAYS[(month - 1) as usize]
    }
}

/// Days of forcing data available from January 1st of `start_year` through
/// the end of the supported range
pub fn available_days(start_year: i32) -> Option<u32> {
    if !(1968..=LAST_SUPPORTED_YEAR).contains(&start_year) {
        return None;
    }
    Some((start_year..=LAST_SUPPORTED_YEAR).map(days_in_year).sum())
}

/// Boundaries crossed by one clock advance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tick {
    pub day_rolled: bool,
    pub month_rolled: bool,
    pub year_rolled: bool,
}

/// Calendar state of a running simulation
#[derive(Debug, Clone)]
pub struct SimClock {
    pub year: i32,
    /// 1-12
    pub month: u32,
    /// 1-31
    pub day_of_month: u32,
    /// 1-365/366, resets at year boundaries
    pub day_of_year: u32,
    /// 1-based count of simulated days, never resets
    pub day_index: u32,
    second_of_day: f64,
}

impl SimClock {
    /// Midnight, January 1st of the start year
    pub fn new(start_year: i32) -> Self {
        Self {
            year: start_year,
            month: 1,
            day_of_month: 1,
            day_of_year: 1,
            day_index: 1,
            second_of_day: 0.0,
        }
    }

    pub fn second_of_day(&self) -> f64 {
        self.second_of_day
    }

    /// Advance by `dt` seconds, reporting any boundaries crossed.
    ///
    /// The automatic step rarely divides the day evenly; the fractional
    /// remainder carries over into the new day.
    pub fn advance(&mut self, dt: f64) -> Tick {
        let mut tick = Tick::default();
        self.second_of_day += dt;

        if self.second_of_day >= 86_400.0 {
            self.second_of_day -= 86_400.0;
            tick.day_rolled = true;

            self.day_index += 1;
            self.day_of_year += 1;
            self.day_of_month += 1;

            if self.day_of_month > days_in_month(self.year, self.month) {
                self.day_of_month = 1;
                self.month += 1;
                tick.month_rolled = true;

                if self.month > 12 {
                    self.month = 1;
                    self.year += 1;
                    self.day_of_year = 1;
                    tick.year_rolled = true;
                }
            }
        }

        tick
    }

    /// True once the clock leaves the range the forcing data covers
    pub fn out_of_range(&self) -> bool {
        self.year > LAST_SUPPORTED_YEAR || self.day_of_year > 366
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_rule_is_restricted_to_supported_range() {
        assert!(is_leap_year(1968));
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2008));
        assert!(!is_leap_year(1999));
        // mod-4 years outside the window do not count
        assert!(!is_leap_year(2012));
        assert!(!is_leap_year(1964));
    }

    #[test]
    fn available_days_match_legacy_table() {
        assert_eq!(available_days(2009), Some(365));
        assert_eq!(available_days(2008), Some(731));
        assert_eq!(available_days(2000), Some(3653));
        assert_eq!(available_days(1989), Some(7670));
        assert_eq!(available_days(2010), None);
    }

    #[test]
    fn whole_day_steps_roll_the_day() {
        let mut clock = SimClock::new(1990);
        let tick = clock.advance(86_400.0);
        assert!(tick.day_rolled);
        assert!(!tick.month_rolled);
        assert_eq!(clock.day_of_month, 2);
        assert_eq!(clock.day_index, 2);
    }

    #[test]
    fn fractional_steps_carry_the_remainder() {
        let mut clock = SimClock::new(1990);
        let dt = 86_400.0 / 3.0 + 10.0;
        assert!(!clock.advance(dt).day_rolled);
        assert!(!clock.advance(dt).day_rolled);
        assert!(clock.advance(dt).day_rolled);
        // 30 leftover seconds stay on the clock
        assert!((clock.second_of_day() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn month_and_year_boundaries() {
        let mut clock = SimClock::new(1999);
        let mut months = 0;
        let mut years = 0;
        for _ in 0..366 {
            let tick = clock.advance(86_400.0);
            if tick.month_rolled {
                months += 1;
            }
            if tick.year_rolled {
                years += 1;
            }
        }
        assert_eq!(months, 12);
        assert_eq!(years, 1);
        assert_eq!(clock.year, 2000);
        assert_eq!(clock.day_of_year, 2);
        // 2000 is a leap year in the supported window
        assert_eq!(days_in_month(2000, 2), 29);
    }
}
