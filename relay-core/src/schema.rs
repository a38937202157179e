// @generated — mirrors the `users` table.

diesel::table! {
    users (pubkey) {
        pubkey -> Bytea,
        is_admitted -> Bool,
        balance -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        tos_accepted_at -> Nullable<Timestamptz>,
    }
}
