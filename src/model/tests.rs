use super::*;

#[test]
fn clamp_above_max_marks_degraded() {
    // Scenario 1: Tag t1 float, min=0, max=10. set(value=15, status=0).
    let mut t1 = Tag::new("t1", TagType::Float, "sim", 0.0, 10.0, true, None);
    let tv = t1.clamp_and_store(TagData::Float(15.0), 0);
    assert_eq!(tv.value, TagData::Float(10.0));
    assert_eq!(tv.status, -1);
    assert_eq!(t1.status, -1);
    assert_eq!(t1.value, Some(TagData::Float(10.0)));
}

#[test]
fn clamp_below_min_marks_degraded() {
    let mut t = Tag::new("t", TagType::Float, "sim", 0.0, 10.0, true, None);
    let tv = t.clamp_and_store(TagData::Float(-5.0), 0);
    assert_eq!(tv.value, TagData::Float(0.0));
    assert_eq!(tv.status, -1);
}

#[test]
fn no_clamp_when_min_equals_max() {
    // Scenario 2: Tag t2 int, min=0, max=0. set(value=42).
    let mut t2 = Tag::new("t2", TagType::Int, "sim", 0.0, 0.0, true, None);
    let tv = t2.clamp_and_store(TagData::Int(42), 0);
    assert_eq!(tv.value, TagData::Int(42));
    assert_eq!(tv.status, 0);
}

#[test]
fn in_bounds_value_passes_through_status() {
    let mut t = Tag::new("t", TagType::Float, "sim", 0.0, 10.0, true, None);
    let tv = t.clamp_and_store(TagData::Float(5.0), 7);
    assert_eq!(tv.value, TagData::Float(5.0));
    assert_eq!(tv.status, 7);
}

#[test]
fn array_round_trips_through_csv() {
    let data = TagData::Array(vec![1.0, 2.5, -3.0]);
    let csv = data.join_csv();
    assert_eq!(csv, "1,2.5,-3");
    let back = TagData::parse_csv(&csv);
    assert_eq!(back, TagData::Array(vec![1.0, 2.5, -3.0]));
}

#[test]
fn tag_type_parse_rejects_unknown() {
    assert!(TagType::parse("bool").is_ok());
    assert!(TagType::parse("BOOL").is_ok());
    assert!(TagType::parse("enum").is_err());
}
