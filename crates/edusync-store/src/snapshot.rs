//! In-memory image of every mirrored collection.

use serde::{Deserialize, Serialize};

use edusync_shared::records::{
    AttendanceLog, AttendanceRecord, Certificate, ChatMessage, Invoice, LeaveRequest, Notice,
    Staff, Student,
};
use edusync_shared::{Collection, CollectionRecord};

/// Typed access to the vector that holds `Self` inside a [`Snapshot`].
pub trait Slot: CollectionRecord {
    fn slot(snapshot: &Snapshot) -> &Vec<Self>;
    fn slot_mut(snapshot: &mut Snapshot) -> &mut Vec<Self>;
}

macro_rules! snapshot_slots {
    ($($field:ident: $ty:ty => $collection:ident),+ $(,)?) => {
        /// Full contents of the local mirror. Serialized as one JSON object
        /// keyed by collection name. Missing collections decode as empty.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        pub struct Snapshot {
            $(pub $field: Vec<$ty>,)+
        }

        $(
            impl Slot for $ty {
                fn slot(snapshot: &Snapshot) -> &Vec<Self> {
                    &snapshot.$field
                }

                fn slot_mut(snapshot: &mut Snapshot) -> &mut Vec<Self> {
                    &mut snapshot.$field
                }
            }
        )+

        impl Snapshot {
            /// Number of records held for `collection`.
            pub fn len_of(&self, collection: Collection) -> usize {
                match collection {
                    $(Collection::$collection => self.$field.len(),)+
                }
            }
        }
    };
}

snapshot_slots! {
    students: Student => Students,
    staff: Staff => Staff,
    invoices: Invoice => Invoices,
    leave_requests: LeaveRequest => LeaveRequests,
    notices: Notice => Notices,
    chats: ChatMessage => Chats,
    certificates: Certificate => Certificates,
    attendance_records: AttendanceRecord => AttendanceRecords,
    attendance_logs: AttendanceLog => AttendanceLogs,
}

impl Snapshot {
    pub fn records<K: Slot>(&self) -> &[K] {
        K::slot(self)
    }

    pub fn get<K: Slot>(&self, id: &str) -> Option<&K> {
        K::slot(self).iter().find(|r| r.id() == id)
    }

    /// Insert `record`, replacing any record with the same id in place.
    pub fn upsert<K: Slot>(&mut self, record: K) {
        let slot = K::slot_mut(self);
        match slot.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => slot.push(record),
        }
    }

    pub fn remove<K: Slot>(&mut self, id: &str) -> Option<K> {
        let slot = K::slot_mut(self);
        let pos = slot.iter().position(|r| r.id() == id)?;
        Some(slot.remove(pos))
    }

    pub fn replace_all<K: Slot>(&mut self, records: Vec<K>) {
        *K::slot_mut(self) = records;
    }

    pub fn is_empty(&self) -> bool {
        Collection::ALL.iter().all(|c| self.len_of(*c) == 0)
    }
}
