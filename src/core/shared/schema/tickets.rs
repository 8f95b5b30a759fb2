diesel::table! {
    tickets (id) {
        id -> Int8,
        external_id -> Uuid,
        owner_id -> Uuid,
        title -> Varchar,
        message -> Text,
        status -> Varchar,
        sender_type -> Varchar,
        attachments -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    replies (id) {
        id -> Int8,
        ticket_id -> Int8,
        author_id -> Uuid,
        message -> Text,
        sender_type -> Varchar,
        attachments -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(replies -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(tickets, replies);
