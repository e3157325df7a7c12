table! {
    time_slots (id) {
        id -> Text,
        date -> Date,
        start_time -> Time,
        end_time -> Time,
        available -> Bool,
        title -> Text,
    }
}

table! {
    calendar_meta (id) {
        id -> Int4,
        last_updated -> Nullable<Timestamptz>,
        updated_by -> Text,
    }
}

allow_tables_to_appear_in_same_query!(time_slots, calendar_meta);
