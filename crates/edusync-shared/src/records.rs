//! Typed record shapes, one per collection.
//!
//! Field names serialize in camelCase, which is the shape collaborators and
//! the local cache use. The remote adapter translates them to the wire
//! convention. Free-text fields accept `null` because the wire normalizes
//! empty strings to `null`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Collection, MessageKind};

/// A record type that lives in exactly one collection.
pub trait CollectionRecord:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

/// Deserialize `null` as the type's default value.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// People
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Inactive,
    Graduated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub class_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roll_number: String,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub guardian_phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub admission_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaffRole {
    Admin,
    Teacher,
    Accountant,
    Support,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub role: StaffRole,
    #[serde(default, deserialize_with = "null_as_default")]
    pub department: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub joined_on: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InvoiceStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub student_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Amount in minor currency units.
    pub amount_minor: i64,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub status: InvoiceStatus,
    #[serde(default)]
    pub paid_on: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Leave, notices, certificates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeaveStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub id: String,
    pub requester_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub requester_name: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
    #[serde(default)]
    pub status: LeaveStatus,
    #[serde(default)]
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    pub author_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author_role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub student_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    pub issued_on: NaiveDate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub issued_by: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub serial_number: String,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A chat message. `text` holds an envelope for private messages and
/// plaintext for broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender_role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub marked_by: Option<String>,
}

/// Staff check-in / check-out log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceLog {
    pub id: String,
    pub staff_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub check_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_out: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Closed set of all records
// ---------------------------------------------------------------------------

macro_rules! records {
    ($($variant:ident($ty:ident) => $collection:ident),+ $(,)?) => {
        $(
            impl CollectionRecord for $ty {
                const COLLECTION: Collection = Collection::$collection;

                fn id(&self) -> &str {
                    &self.id
                }
            }

            impl From<$ty> for Record {
                fn from(record: $ty) -> Self {
                    Record::$variant(record)
                }
            }
        )+

        /// Any record, tagged by the collection it belongs to.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Record {
            $($variant($ty),)+
        }

        impl Record {
            pub fn collection(&self) -> Collection {
                match self {
                    $(Record::$variant(_) => Collection::$collection,)+
                }
            }

            pub fn id(&self) -> &str {
                match self {
                    $(Record::$variant(r) => &r.id,)+
                }
            }

            /// Decode a camelCase JSON object as a record of `collection`.
            pub fn decode(collection: Collection, value: Value) -> Result<Self, serde_json::Error> {
                match collection {
                    $(Collection::$collection => {
                        serde_json::from_value::<$ty>(value).map(Record::$variant)
                    })+
                }
            }

            pub fn to_value(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(Record::$variant(r) => serde_json::to_value(r),)+
                }
            }
        }
    };
}

records! {
    Student(Student) => Students,
    Staff(Staff) => Staff,
    Invoice(Invoice) => Invoices,
    LeaveRequest(LeaveRequest) => LeaveRequests,
    Notice(Notice) => Notices,
    Chat(ChatMessage) => Chats,
    Certificate(Certificate) => Certificates,
    AttendanceRecord(AttendanceRecord) => AttendanceRecords,
    AttendanceLog(AttendanceLog) => AttendanceLogs,
}
