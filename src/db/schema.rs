diesel::table! {
    projects (id) {
        id -> Integer,
        title -> Text,
        position -> Integer,
        created_at -> BigInt,
    }
}

diesel::table! {
    todos (id) {
        id -> Integer,
        project_id -> Integer,
        title -> Text,
        completed -> Bool,
        position -> Integer,
        created_at -> BigInt,
        completed_at -> Nullable<BigInt>,
        due_at -> Nullable<BigInt>,
        recurrence_interval -> Nullable<Integer>,
        recurrence_unit -> Nullable<Text>,
        external_uid -> Nullable<Text>,
    }
}

diesel::table! {
    feed_subscriptions (id) {
        id -> Integer,
        url -> Text,
        project_id -> Integer,
        last_synced_at -> Nullable<BigInt>,
        created_at -> BigInt,
    }
}

diesel::joinable!(todos -> projects (project_id));
diesel::joinable!(feed_subscriptions -> projects (project_id));

diesel::allow_tables_to_appear_in_same_query!(projects, todos, feed_subscriptions);
