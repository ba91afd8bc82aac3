diesel::table! {
    users (id) {
        id -> Text,
        username -> Text,
        email -> Text,
        password_hash -> Text,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        is_admin -> Bool,
        is_active -> Bool,
        created_at -> Text,
        last_login -> Nullable<Text>,
        role -> Text,
    }
}

diesel::table! {
    user_sessions (id) {
        id -> Text,
        user_id -> Text,
        session_token -> Text,
        ip_address -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        created_at -> Text,
        expires_at -> Text,
        is_active -> Bool,
    }
}

diesel::table! {
    login_attempts (id) {
        id -> Text,
        username -> Text,
        ip_address -> Nullable<Text>,
        success -> Bool,
        attempted_at -> Text,
        user_agent -> Nullable<Text>,
    }
}

diesel::joinable!(user_sessions -> users (user_id));
diesel::allow_tables_to_appear_in_same_query!(users, user_sessions, login_attempts);
