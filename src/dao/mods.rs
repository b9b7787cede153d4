use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The base ruleset a game runs on (e.g. the default mod, coop, ladder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturedMod {
    pub id: u32,
    /// Stable identifier used on the wire, e.g. `faf` or `ladder1v1`.
    pub technical_name: String,
    pub display_name: String,
    /// Whether games on this mod may count toward ratings.
    pub ranked: bool,
}

/// A sim-mod version activated in a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModVersion {
    pub uid: Uuid,
    pub display_name: String,
}

/// One deployed file of a featured mod, versioned individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturedModFile {
    pub file_id: u32,
    pub version: u32,
}

/// Lookup interface to the mod catalogue.
pub trait ModService: Send + Sync {
    /// Resolve a featured mod by its technical name.
    fn featured_mod(&self, technical_name: &str) -> BoxFuture<'_, Option<FeaturedMod>>;

    /// Whether the mod is the 1v1 ladder ruleset.
    fn is_ladder1v1(&self, featured_mod: &FeaturedMod) -> bool;

    /// Whether the mod is a cooperative ruleset.
    fn is_coop(&self, featured_mod: &FeaturedMod) -> bool;

    /// Whether games on the mod are allowed to be ranked.
    fn is_mod_ranked(&self, featured_mod: &FeaturedMod) -> bool;

    /// Resolve the sim-mod versions for the uids a client reported. Unknown
    /// uids are silently skipped.
    fn find_mod_versions_by_uids(&self, uids: &[Uuid]) -> BoxFuture<'_, Vec<ModVersion>>;

    /// Latest deployed file versions of a featured mod.
    fn latest_file_versions(&self, featured_mod: &FeaturedMod) -> BoxFuture<'_, Vec<FeaturedModFile>>;
}
