//! Field-naming translation between local records and wire rows.
//!
//! Locally every key is camelCase; the remote store speaks snake_case. The
//! conversion walks nested objects and arrays. On the way out, empty strings
//! become `null`.

use serde_json::{Map, Value};

use edusync_shared::{Collection, CollectionRecord};

pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for (i, ch) in key.chars().enumerate() {
        if ch == '_' && i > 0 {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Local record -> wire row.
pub fn to_wire(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_snake_case(&k), to_wire(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(to_wire).collect()),
        Value::String(s) if s.is_empty() => Value::Null,
        other => other,
    }
}

/// Wire row -> local record.
pub fn from_wire(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_camel_case(&k), from_wire(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(from_wire).collect()),
        other => other,
    }
}

pub fn table_name(collection: Collection) -> String {
    to_snake_case(collection.as_str())
}

pub fn collection_for_table(table: &str) -> Option<Collection> {
    Collection::ALL
        .into_iter()
        .find(|c| table_name(*c) == table)
}

pub fn encode<K: CollectionRecord>(record: &K) -> Result<Value, serde_json::Error> {
    Ok(to_wire(serde_json::to_value(record)?))
}

pub fn decode<K: CollectionRecord>(row: Value) -> Result<K, serde_json::Error> {
    serde_json::from_value(from_wire(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_conversion() {
        assert_eq!(to_snake_case("studentId"), "student_id");
        assert_eq!(to_snake_case("isRead"), "is_read");
        assert_eq!(to_snake_case("id"), "id");
        assert_eq!(to_camel_case("student_id"), "studentId");
        assert_eq!(to_camel_case("old_record_id"), "oldRecordId");
        assert_eq!(to_camel_case("type"), "type");
    }

    #[test]
    fn test_nested_conversion() {
        let local = json!({
            "studentId": "s1",
            "guardianContact": {"phoneNumber": "", "altPhones": [{"phoneNumber": "123"}]},
            "rollNumber": ""
        });

        let wire = to_wire(local);
        assert_eq!(
            wire,
            json!({
                "student_id": "s1",
                "guardian_contact": {"phone_number": null, "alt_phones": [{"phone_number": "123"}]},
                "roll_number": null
            })
        );

        let back = from_wire(wire);
        assert_eq!(back["guardianContact"]["altPhones"][0]["phoneNumber"], "123");
        assert!(back["rollNumber"].is_null());
    }

    #[test]
    fn test_table_names() {
        assert_eq!(table_name(Collection::LeaveRequests), "leave_requests");
        assert_eq!(table_name(Collection::AttendanceLogs), "attendance_logs");
        assert_eq!(table_name(Collection::Chats), "chats");
        assert_eq!(collection_for_table("attendance_records"), Some(Collection::AttendanceRecords));
        assert_eq!(collection_for_table("grades"), None);
    }

    #[test]
    fn test_record_round_trip_through_wire() {
        use edusync_shared::records::Student;

        let wire = json!({
            "id": "s1",
            "name": "Asha",
            "class_name": "5B",
            "roll_number": null,
            "guardian_phone": "98450",
            "status": "Active"
        });

        let student: Student = decode(wire).unwrap();
        assert_eq!(student.class_name, "5B");
        assert_eq!(student.roll_number, "");

        let encoded = encode(&student).unwrap();
        assert!(encoded["roll_number"].is_null());
        assert_eq!(encoded["guardian_phone"], "98450");
    }
}
