//! 通用工具函数

use crate::{PacsError, Result};
use chrono::{Local, NaiveDate};

/// DICOM DA 格式
const DICOM_DATE_FORMAT: &str = "%Y%m%d";

/// 验证AE标题：1-16个字符，不含反斜杠和控制字符，且不能全为空格
pub fn is_valid_ae_title(ae_title: &str) -> bool {
    !ae_title.trim().is_empty()
        && ae_title.len() <= 16
        && ae_title.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && c != '\\')
}

/// 当天日期（本地时区），DICOM DA 格式
pub fn today_dicom_date() -> String {
    format_dicom_date(Local::now().date_naive())
}

pub fn format_dicom_date(date: NaiveDate) -> String {
    date.format(DICOM_DATE_FORMAT).to_string()
}

/// 解析 `YYYYMMDD` 日期
pub fn parse_dicom_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DICOM_DATE_FORMAT)
        .map_err(|e| PacsError::Validation(format!("无效的DICOM日期 '{}': {}", value, e)))
}

/// 去除DICOM字符串值尾部的填充（空格或NUL）
pub fn trim_dicom_value(value: &str) -> &str {
    value.trim_end_matches(|c: char| c == '\0' || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ae_title_rules() {
        assert!(is_valid_ae_title("RADIANT"));
        assert!(is_valid_ae_title("AET server"));
        assert!(!is_valid_ae_title(""));
        assert!(!is_valid_ae_title("    "));
        assert!(!is_valid_ae_title("A_VERY_LONG_AE_TITLE"));
        assert!(!is_valid_ae_title("BAD\\AE"));
    }

    #[test]
    fn test_dicom_dates() {
        let date = parse_dicom_date("20240131").unwrap();
        assert_eq!(format_dicom_date(date), "20240131");
        assert!(parse_dicom_date("2024-01-31").is_err());
        assert!(parse_dicom_date("20241301").is_err());
        assert_eq!(today_dicom_date().len(), 8);
    }

    #[test]
    fn test_trim_dicom_value() {
        assert_eq!(trim_dicom_value("1.2.3\0"), "1.2.3");
        assert_eq!(trim_dicom_value("DOE^JOHN "), "DOE^JOHN");
    }
}
