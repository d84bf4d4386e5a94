//! # Playlist configuration
//!
//! Customizations of the `spotify_playlist` terraform resource

use crate::svc::provider::ProviderBuilder;

pub const RESOURCE: &str = "spotify_playlist";
pub const SHORT_GROUP: &str = "playlist";

/// configures the playlist resource
pub fn configure(p: &mut ProviderBuilder) {
    p.add_resource_configurator(RESOURCE, |r| {
        r.short_group = SHORT_GROUP.to_string();
    });
}
