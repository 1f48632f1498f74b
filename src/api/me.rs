//! Signed-in user and tenant routing, read from the saved session

use anyhow::Result;

use crate::auth::{AuthError, Authenticator};
use crate::models::{Audience, RegionConfig, UserIdentity};

fn or_none(value: &str) -> &str {
    if value.is_empty() {
        "(none)"
    } else {
        value
    }
}

fn print_identity(user: &UserIdentity, region: &RegionConfig) {
    println!();
    println!("Display Name: {}", or_none(&user.display_name));
    println!("Mail:         {}", or_none(&user.email));
    println!("MRI:          {}", user.mri);
    println!("ID:           {}", user.object_id);
    if let Some(ref tenant) = user.tenant_id {
        println!("Tenant:       {}", tenant);
    }
    println!("Region:       {}", region.region_partition);
    if let Some(ref url) = region.chat_service_url {
        println!("Chat service: {}", url);
    }
    if let Some(ref url) = region.middle_tier_url {
        println!("Middle tier:  {}", url);
    }
}

/// Display the current user without touching the network.
pub fn whoami(auth: &Authenticator) -> Result<()> {
    auth.check_session()?;
    let user = auth.user_identity().ok_or(AuthError::AuthRequired {
        audience: Audience::Chat,
    })?;
    print_identity(&user, &auth.region_config());
    Ok(())
}
