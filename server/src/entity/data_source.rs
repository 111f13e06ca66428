use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "data_source")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub datagroup_id: i32,
    pub name: String,
    /// Registered type tag (`LFS`, `S3`).
    pub ds_type: String,
    /// fnmatch-style filter applied to bucket names.
    pub pattern: Option<String>,
    /// Key prefix used when listing a bucket root.
    pub prefix: Option<String>,
    /// Encrypted.
    pub key_name: Option<String>,
    /// Encrypted.
    pub key_secret: Option<String>,
    pub bgcolor: Option<String>,
    pub fgcolor: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::app_user::Entity",
        from = "Column::UserId",
        to = "super::app_user::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    AppUser,
    #[sea_orm(
        belongs_to = "super::data_group::Entity",
        from = "Column::DatagroupId",
        to = "super::data_group::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    DataGroup,
}

impl Related<super::app_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AppUser.def()
    }
}

impl Related<super::data_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataGroup.def()
    }
}

impl Model {
    pub fn has_saved_secret(&self) -> bool {
        self.key_secret.is_some()
    }
}

impl ActiveModelBehavior for ActiveModel {}
