/// Counselling remark bands keyed on percentile. The bands mirror the
/// institute's NEET guidance sheet; boundaries are inclusive on the left.
pub fn remark_for_percentile(percentile: f64) -> &'static str {
    if percentile < 50.0 {
        "Needs foundational revision"
    } else if percentile < 75.0 {
        "May secure BDS / AYUSH / Pvt Mgmt seat"
    } else if percentile < 90.0 {
        "Pvt MBBS / Reserved Govt possibility"
    } else {
        "High performance zone - Strong Govt MBBS chance"
    }
}

pub const ABSENT_REMARK: &str = "Absent for the test";

#[allow(dead_code)]
pub fn percentage(scored: f64, full_marks: f64) -> f64 {
    if full_marks <= 0.0 {
        return 0.0;
    }
    (scored / full_marks) * 100.0
}
