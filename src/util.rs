use chrono::{Datelike, Local, NaiveDate};
use std::io::Write;
use std::sync::Once;

static INIT_LOGGER_ONCE: Once = Once::new();

pub fn init() {
    INIT_LOGGER_ONCE.call_once(|| {
        dotenv::dotenv().ok();

        env_logger::builder()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {:<5} {}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.module_path().unwrap(),
                    record.args()
                )
            })
            .init();
    })
}

// the xbase file family is little-endian throughout

pub fn u16_val(buf: &[u8], addr: usize) -> u16 {
    u16::from_le_bytes(buf[addr..addr + 2].try_into().expect("ERR_READ_VALUE_u16"))
}

pub fn u32_val(buf: &[u8], addr: usize) -> u32 {
    u32::from_le_bytes(buf[addr..addr + 4].try_into().expect("ERR_READ_VALUE_u32"))
}

pub fn i32_val(buf: &[u8], addr: usize) -> i32 {
    i32::from_le_bytes(buf[addr..addr + 4].try_into().expect("ERR_READ_VALUE_i32"))
}

pub fn i64_val(buf: &[u8], addr: usize) -> i64 {
    i64::from_le_bytes(buf[addr..addr + 8].try_into().expect("ERR_READ_VALUE_i64"))
}

/// Julian day number of 0000-12-31 in the proleptic Gregorian calendar.
/// `T` slots store their date half as a day number in this era.
const JDN_BASE: i64 = 1_721_425;

pub fn julian_to_date(jdn: u32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt((jdn as i64 - JDN_BASE) as i32)
}

pub fn date_to_julian(date: NaiveDate) -> u32 {
    (date.num_days_from_ce() as i64 + JDN_BASE) as u32
}

#[cfg(test)]
mod util_tests {

    use std::env::set_var;

    use log::info;

    use super::*;

    fn setup() {
        set_var("RUST_LOG", "info");
        init();
    }

    #[test]
    fn test_conv_u16() {
        setup();
        let buf = [0x34u8, 0x12, 0xff, 0x00];
        info!("buf={:?}", buf);
        assert_eq!(u16_val(&buf, 0), 0x1234);
        assert_eq!(u16_val(&buf, 2), 0x00ff);
    }

    #[test]
    fn test_conv_u32() {
        setup();
        let buf = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(u32_val(&buf, 2), 0x06050403);
    }

    #[test]
    fn test_conv_i32() {
        setup();
        let buf = (-7i32).to_le_bytes();
        assert_eq!(i32_val(&buf, 0), -7);
    }

    #[test]
    fn test_julian_epoch() {
        setup();
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(date_to_julian(epoch), 2_440_588);
        assert_eq!(julian_to_date(2_440_588), Some(epoch));
    }

    #[test]
    fn test_julian_round_trip() {
        setup();
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(julian_to_date(date_to_julian(d)), Some(d));
    }
}
