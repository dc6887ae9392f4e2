//! Shared fixtures for unit tests: an in-memory SQLite database and the
//! sample models exercising every field kind.

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};

use crate::entity::{auth_session, user};

pub mod hero {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "hero")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
        pub secret_name: String,
        pub age: Option<i32>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod stuff {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "stuff")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub f1: String,
        pub f2: i64,
        pub f3: bool,
        pub f4: Option<String>,
        pub f5: Option<Uuid>,
        pub f6: Option<DateTime>,
        pub f7: Option<f64>,
        pub hidden: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod event {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "event")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub at: DateTimeUtc,
        pub logged: Option<TimeDateTime>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    db.execute(backend.build(&schema.create_table_from_entity(entity)))
        .await
        .expect("create table");
}

/// Connects to a fresh in-memory database holding the auth tables and the
/// sample model tables.
pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect to sqlite");
    create_table(&db, user::Entity).await;
    create_table(&db, auth_session::Entity).await;
    create_table(&db, hero::Entity).await;
    create_table(&db, stuff::Entity).await;
    create_table(&db, event::Entity).await;
    db
}
