//! Credential extraction from a captured session snapshot
//!
//! Every function here is pure: the same snapshot and clock always give the
//! same answer. Individual storage entries or cookies that fail to parse are
//! skipped; only the absence of any qualifying entry yields `None`.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use super::jwt::{decode_unverified, Claims};
use super::mri::{normalize_mri, object_id_of};
use crate::models::{
    Audience, ChatCredential, CredentialBundle, FavouritesCredential, MessagingCredential,
    RegionConfig, SearchCredential, SessionSnapshot, StorageEntry, UserIdentity,
};

const SUBSTRATE_HOST: &str = "substrate.office.com";
const SUBSTRATE_SEARCH_SCOPE: &str = "SubstrateSearch";
const CHATSVCAGG_HOST: &str = "chatsvcagg.teams.microsoft.com";
const SKYPE_SPACES_HOST: &str = "api.spaces.skype.com";
const TEMP_ENTRY_PREFIX: &str = "tmp.";
const REGION_DISCOVERY_KEY: &str = "DISCOVER-REGION-GTM";

/// Session-proof cookie issued by the Teams auth service.
pub const SKYPE_TOKEN_COOKIE: &str = "skypetoken_asm";
/// Bearer cookie, stored URL-encoded as `Bearer=<jwt>&Origin=...`.
pub const AUTH_TOKEN_COOKIE: &str = "authtoken";

/// MSAL-style access token record stored in local storage.
#[derive(Debug, Deserialize)]
struct TokenEntry {
    secret: Option<String>,
    target: Option<String>,
}

impl TokenEntry {
    fn parse(entry: &StorageEntry) -> Option<Self> {
        serde_json::from_str(&entry.value).ok()
    }

    fn target_contains(&self, needle: &str) -> bool {
        self.target.as_deref().is_some_and(|t| t.contains(needle))
    }

    fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// A decoded, unexpired token.
struct Candidate {
    token: String,
    exp: u64,
    claims: Claims,
}

impl Candidate {
    fn from_entry(entry: &TokenEntry, now: u64) -> Option<Self> {
        let token = entry.secret()?;
        let claims = decode_unverified(token)?;
        let exp = claims.exp.filter(|&exp| exp > now)?;
        Some(Self {
            token: token.to_string(),
            exp,
            claims,
        })
    }

    /// Keep whichever of `best` and `self` expires later. Ties break on the
    /// token text so the outcome never depends on storage order.
    fn keep_latest(self, best: Option<Candidate>) -> Option<Candidate> {
        match best {
            Some(b) if (b.exp, &b.token) >= (self.exp, &self.token) => Some(b),
            _ => Some(self),
        }
    }
}

/// Substrate search bearer with the furthest-future expiry.
pub fn extract_search_token(snapshot: &SessionSnapshot, now: u64) -> Option<SearchCredential> {
    let best = best_search_candidate(snapshot, now)?;
    tracing::debug!("Search token selected (exp {})", best.exp);
    Some(SearchCredential {
        token: best.token,
        expires_at: best.exp,
    })
}

fn best_search_candidate(snapshot: &SessionSnapshot, now: u64) -> Option<Candidate> {
    snapshot
        .teams_entries()
        .iter()
        .filter_map(TokenEntry::parse)
        .filter(|e| e.target_contains(SUBSTRATE_HOST) && e.target_contains(SUBSTRATE_SEARCH_SCOPE))
        .filter_map(|e| Candidate::from_entry(&e, now))
        .fold(None, |best, c| c.keep_latest(best))
}

/// Chat bearer plus the user it belongs to.
///
/// Prefers the chat aggregator audience over Skype spaces regardless of
/// expiry. Fails closed: without a resolvable user the result is `None`.
pub fn extract_chat_token(snapshot: &SessionSnapshot, now: u64) -> Option<ChatCredential> {
    let mut best_chatsvcagg: Option<Candidate> = None;
    let mut best_skype: Option<Candidate> = None;
    let mut seen_object_id: Option<String> = None;

    for entry in snapshot.teams_entries().iter().filter_map(TokenEntry::parse) {
        let is_chatsvcagg = entry.target_contains(CHATSVCAGG_HOST);
        let is_skype = entry.target_contains(SKYPE_SPACES_HOST);
        if !is_chatsvcagg && !is_skype {
            continue;
        }

        if seen_object_id.is_none() {
            seen_object_id = entry
                .secret()
                .and_then(decode_unverified)
                .and_then(|c| c.oid);
        }

        let Some(candidate) = Candidate::from_entry(&entry, now) else {
            continue;
        };
        if is_chatsvcagg {
            best_chatsvcagg = candidate.keep_latest(best_chatsvcagg);
        } else {
            best_skype = candidate.keep_latest(best_skype);
        }
    }

    let chosen = best_chatsvcagg.or(best_skype)?;
    if chosen.token.is_empty() || chosen.exp <= now {
        return None;
    }

    let object_id = chosen
        .claims
        .oid
        .clone()
        .or(seen_object_id)
        .or_else(|| best_search_candidate(snapshot, now).and_then(|c| c.claims.oid))
        .and_then(|oid| object_id_of(&oid));

    let Some(object_id) = object_id else {
        tracing::debug!("Chat token found but no user object id could be resolved");
        return None;
    };

    let user = identity_for(snapshot, &object_id, Some(&chosen.claims));
    Some(ChatCredential {
        token: chosen.token,
        expires_at: chosen.exp,
        user,
    })
}

/// Cookie pair for the chat service.
pub fn extract_message_auth(snapshot: &SessionSnapshot) -> Option<MessagingCredential> {
    let skype_token = snapshot
        .teams_cookie(SKYPE_TOKEN_COOKIE)
        .map(|c| c.value.trim())
        .filter(|v| !v.is_empty())?;
    let auth_token = snapshot
        .teams_cookie(AUTH_TOKEN_COOKIE)
        .and_then(|c| clean_auth_cookie(&c.value))?;

    let mri = decode_unverified(skype_token)
        .and_then(|c| c.skypeid)
        .and_then(|id| normalize_mri(&id))
        .or_else(|| {
            decode_unverified(&auth_token)
                .and_then(|c| c.oid)
                .and_then(|oid| normalize_mri(&oid))
        })?;
    let object_id = object_id_of(&mri)?;

    Some(MessagingCredential {
        skype_token: skype_token.to_string(),
        auth_token,
        user: identity_for(snapshot, &object_id, None),
    })
}

/// Decode the `authtoken` cookie: URL-decode, drop the `Bearer=` marker and
/// any trailing `&Origin=...` parameters.
pub fn clean_auth_cookie(raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw.trim()).ok()?;
    let without_scheme = decoded
        .strip_prefix("Bearer=")
        .or_else(|| decoded.strip_prefix("Bearer "))
        .unwrap_or(&decoded);
    let token = without_scheme.split('&').next().unwrap_or("").trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Conversation folders token from any origin's local storage.
pub fn extract_favourites_token(snapshot: &SessionSnapshot) -> Option<FavouritesCredential> {
    let favourites_token = snapshot
        .all_entries()
        .filter(|e| e.name.contains(CHATSVCAGG_HOST) && !e.name.starts_with(TEMP_ENTRY_PREFIX))
        .filter_map(TokenEntry::parse)
        .find_map(|e| e.secret().map(str::to_string))?;

    let skype_token = snapshot
        .teams_cookie(SKYPE_TOKEN_COOKIE)
        .map(|c| c.value.trim().to_string())
        .filter(|v| !v.is_empty())?;

    Some(FavouritesCredential {
        skype_token,
        favourites_token,
    })
}

/// Profile of the signed-in user from the first token carrying `oid` and
/// `name` claims.
pub fn extract_user_identity(snapshot: &SessionSnapshot) -> Option<UserIdentity> {
    snapshot
        .teams_entries()
        .iter()
        .filter_map(entry_claims)
        .find(|c| c.oid.is_some() && c.name.is_some())
        .and_then(|c| identity_from_claims(&c))
}

fn entry_claims(entry: &StorageEntry) -> Option<Claims> {
    match TokenEntry::parse(entry) {
        Some(parsed) => parsed.secret().and_then(decode_unverified),
        None => decode_unverified(&entry.value),
    }
}

fn identity_from_claims(claims: &Claims) -> Option<UserIdentity> {
    let object_id = object_id_of(claims.oid.as_deref()?)?;
    let mut user = UserIdentity::from_object_id(&object_id);
    user.email = claims.email().unwrap_or_default().to_string();
    user.display_name = claims.name.clone().unwrap_or_default();
    user.given_name = claims.given_name.clone();
    user.surname = claims.family_name.clone();
    user.tenant_id = claims.tid.clone();
    Some(user)
}

/// Best identity for `object_id`: the token's own claims, then the profile
/// found elsewhere in the snapshot, then the bare id.
fn identity_for(snapshot: &SessionSnapshot, object_id: &str, claims: Option<&Claims>) -> UserIdentity {
    let from_claims = claims
        .filter(|c| c.name.is_some())
        .and_then(identity_from_claims)
        .filter(|u| u.object_id == object_id);
    from_claims
        .or_else(|| extract_user_identity(snapshot).filter(|u| u.object_id == object_id))
        .unwrap_or_else(|| UserIdentity::from_object_id(object_id))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionUrls {
    middle_tier: Option<String>,
    chat_service_afd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryEntry {
    item: Option<RegionUrls>,
    #[serde(flatten)]
    top: RegionUrls,
}

fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/(?:mt(?:/part)?|chatsvc)/([a-z]+)(?:-(\d+))?(?:[/?#]|$)")
            .expect("region regex is valid")
    })
}

/// Region routing parsed from the discovery entry.
pub fn extract_region_config(snapshot: &SessionSnapshot) -> Option<RegionConfig> {
    let urls = snapshot
        .all_entries()
        .filter(|e| e.name.contains(REGION_DISCOVERY_KEY))
        .filter_map(|e| serde_json::from_str::<DiscoveryEntry>(&e.value).ok())
        .map(|d| {
            let item = d.item.unwrap_or_default();
            RegionUrls {
                middle_tier: item.middle_tier.or(d.top.middle_tier),
                chat_service_afd: item.chat_service_afd.or(d.top.chat_service_afd),
            }
        })
        .find(|u| u.middle_tier.is_some() || u.chat_service_afd.is_some())?;

    let matches: Vec<(String, Option<String>)> = [&urls.middle_tier, &urls.chat_service_afd]
        .into_iter()
        .flatten()
        .filter_map(|url| {
            let caps = region_pattern().captures(url)?;
            let region = caps.get(1)?.as_str().to_string();
            let partition = caps.get(2).map(|m| m.as_str().to_string());
            Some((region, partition))
        })
        .collect();

    // The partitioned form is the more specific one.
    let (region, partition) = matches
        .iter()
        .find(|(_, p)| p.is_some())
        .or_else(|| matches.first())
        .cloned()?;

    let region_partition = match &partition {
        Some(p) => format!("{}-{}", region, p),
        None => region.clone(),
    };

    Some(RegionConfig {
        region,
        partition,
        region_partition,
        middle_tier_url: urls.middle_tier,
        chat_service_url: urls.chat_service_afd,
    })
}

/// Extract the credential for one audience.
///
/// Search goes straight to the snapshot here; callers that want the cached
/// path use [`super::cache::TokenCache`].
pub fn extract(snapshot: &SessionSnapshot, audience: Audience, now: u64) -> Option<CredentialBundle> {
    match audience {
        Audience::Search => extract_search_token(snapshot, now).map(CredentialBundle::Search),
        Audience::Chat => extract_chat_token(snapshot, now).map(CredentialBundle::Chat),
        Audience::Messaging => extract_message_auth(snapshot).map(CredentialBundle::Messaging),
        Audience::Favourites => {
            extract_favourites_token(snapshot).map(CredentialBundle::Favourites)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::super::jwt::test_support::make_token;
    use super::test_support::*;
    use super::*;
    use crate::models::{OriginStorage, StorageEntry};
    use serde_json::json;

    fn permutations(items: &[StorageEntry]) -> Vec<Vec<StorageEntry>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_search_token_scenario_valid() {
        let snapshot = teams_snapshot(vec![search_entry(NOW + 3600)]);
        let cred = extract_search_token(&snapshot, NOW).unwrap();
        assert_eq!(cred.expires_at, NOW + 3600);
        assert_eq!(cred.token.split('.').count(), 3);
    }

    #[test]
    fn test_search_token_scenario_expired() {
        let snapshot = teams_snapshot(vec![search_entry(NOW - 10)]);
        assert!(extract_search_token(&snapshot, NOW).is_none());
    }

    #[test]
    fn test_search_token_picks_latest_expiry_in_any_order() {
        let entries = vec![
            search_entry(NOW - 500),
            search_entry(NOW + 100),
            search_entry(NOW + 7200),
            search_entry(NOW + 3600),
        ];
        for perm in permutations(&entries) {
            let cred = extract_search_token(&teams_snapshot(perm), NOW).unwrap();
            assert_eq!(cred.expires_at, NOW + 7200);
        }
    }

    #[test]
    fn test_search_token_none_when_all_expired() {
        let entries = vec![search_entry(NOW - 1), search_entry(NOW), search_entry(NOW - 3600)];
        for perm in permutations(&entries) {
            assert!(extract_search_token(&teams_snapshot(perm), NOW).is_none());
        }
    }

    #[test]
    fn test_search_token_requires_both_target_markers() {
        let entries = vec![
            token_entry(
                "a",
                "https://substrate.office.com/Other.Read",
                json!({"exp": NOW + 100}),
            ),
            token_entry(
                "b",
                "https://outlook.office.com/SubstrateSearch",
                json!({"exp": NOW + 100}),
            ),
        ];
        assert!(extract_search_token(&teams_snapshot(entries), NOW).is_none());
    }

    #[test]
    fn test_search_token_legacy_scope_format() {
        let entries = vec![token_entry(
            "legacy",
            "https://substrate.office.com/SubstrateSearch-Internal.ReadWrite openid profile",
            json!({"exp": NOW + 60}),
        )];
        assert!(extract_search_token(&teams_snapshot(entries), NOW).is_some());
    }

    #[test]
    fn test_search_token_skips_malformed_entries() {
        let entries = vec![
            StorageEntry {
                name: "garbage".into(),
                value: "{not json".into(),
            },
            StorageEntry {
                name: "plain".into(),
                value: "\"just a string\"".into(),
            },
            StorageEntry {
                name: "no-secret".into(),
                value: json!({"target": "substrate.office.com SubstrateSearch"}).to_string(),
            },
            StorageEntry {
                name: "bad-jwt".into(),
                value: json!({"target": "substrate.office.com SubstrateSearch", "secret": "x.y"})
                    .to_string(),
            },
            token_entry(
                "no-exp",
                "https://substrate.office.com/SubstrateSearch",
                json!({"oid": OID}),
            ),
            search_entry(NOW + 900),
        ];
        let cred = extract_search_token(&teams_snapshot(entries), NOW).unwrap();
        assert_eq!(cred.expires_at, NOW + 900);
    }

    #[test]
    fn test_search_token_ignores_other_origins() {
        let snapshot = SessionSnapshot {
            cookies: vec![],
            origins: vec![OriginStorage {
                origin: "https://outlook.office.com".into(),
                local_storage: vec![search_entry(NOW + 3600)],
            }],
        };
        assert!(extract_search_token(&snapshot, NOW).is_none());
    }

    #[test]
    fn test_chat_prefers_chatsvcagg_over_longer_skype() {
        let snapshot = teams_snapshot(vec![
            skype_entry(NOW + 5 * 3600, Some(OID)),
            chatsvcagg_entry(NOW + 2 * 3600, Some(OID)),
        ]);
        let cred = extract_chat_token(&snapshot, NOW).unwrap();
        assert_eq!(cred.expires_at, NOW + 2 * 3600);
        assert_eq!(cred.user.mri, format!("8:orgid:{}", OID));
    }

    #[test]
    fn test_chat_falls_back_to_skype_when_chatsvcagg_expired() {
        let snapshot = teams_snapshot(vec![
            chatsvcagg_entry(NOW - 5, Some(OID)),
            skype_entry(NOW + 600, Some(OID)),
        ]);
        let cred = extract_chat_token(&snapshot, NOW).unwrap();
        assert_eq!(cred.expires_at, NOW + 600);
    }

    #[test]
    fn test_chat_fails_closed_without_identity() {
        let snapshot = teams_snapshot(vec![chatsvcagg_entry(NOW + 3600, None)]);
        assert!(extract_chat_token(&snapshot, NOW).is_none());
    }

    #[test]
    fn test_chat_identity_from_search_token() {
        let snapshot = teams_snapshot(vec![
            chatsvcagg_entry(NOW + 3600, None),
            search_entry(NOW + 3600),
        ]);
        let cred = extract_chat_token(&snapshot, NOW).unwrap();
        assert_eq!(cred.user.object_id, OID);
    }

    #[test]
    fn test_chat_identity_from_other_candidate() {
        // Expired skype token still tells us who the user is.
        let snapshot = teams_snapshot(vec![
            skype_entry(NOW - 100, Some(OID)),
            chatsvcagg_entry(NOW + 3600, None),
        ]);
        let cred = extract_chat_token(&snapshot, NOW).unwrap();
        assert_eq!(cred.user.object_id, OID);
    }

    #[test]
    fn test_chat_enriches_identity_with_profile() {
        let profile = token_entry(
            "idtoken",
            "openid profile",
            json!({"oid": OID, "name": "Ada Lovelace", "upn": "ada@example.com", "tid": "t1"}),
        );
        let snapshot = teams_snapshot(vec![profile, chatsvcagg_entry(NOW + 3600, Some(OID))]);
        let cred = extract_chat_token(&snapshot, NOW).unwrap();
        assert_eq!(cred.user.display_name, "Ada Lovelace");
        assert_eq!(cred.user.email, "ada@example.com");
        assert_eq!(cred.user.tenant_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_audiences_are_independent() {
        let search = vec![search_entry(NOW + 1000), search_entry(NOW + 2000)];
        let chat = vec![chatsvcagg_entry(NOW + 3000, Some(OID))];

        let full: Vec<_> = search.iter().chain(chat.iter()).cloned().collect();
        let baseline_search = extract_search_token(&teams_snapshot(full.clone()), NOW);
        let baseline_chat = extract_chat_token(&teams_snapshot(full), NOW);
        assert!(baseline_search.is_some());
        assert!(baseline_chat.is_some());

        // Corrupt chat entries: search unchanged.
        let mut corrupted_chat = search.clone();
        corrupted_chat.push(StorageEntry {
            name: "chatsvcagg".into(),
            value: json!({"target": CHATSVCAGG_HOST, "secret": "broken"}).to_string(),
        });
        assert_eq!(
            extract_search_token(&teams_snapshot(corrupted_chat), NOW),
            baseline_search
        );
        assert_eq!(extract_search_token(&teams_snapshot(search), NOW), baseline_search);

        // Remove search entries: chat unchanged.
        assert_eq!(extract_chat_token(&teams_snapshot(chat), NOW), baseline_chat);
    }

    fn skype_cookie_token(skypeid: &str) -> String {
        make_token(json!({"skypeid": skypeid, "exp": NOW + 3600}))
    }

    #[test]
    fn test_message_auth_scenario() {
        let bearer = make_token(json!({"oid": "ffffffff-0000-0000-0000-000000000000"}));
        let encoded = urlencoding::encode(&format!("Bearer={}&Origin=https://teams.microsoft.com", bearer))
            .into_owned();
        let mut snapshot = teams_snapshot(vec![]);
        snapshot.cookies = vec![
            teams_cookie(SKYPE_TOKEN_COOKIE, &skype_cookie_token("8:orgid:abc-123")),
            teams_cookie(AUTH_TOKEN_COOKIE, &encoded),
        ];

        let cred = extract_message_auth(&snapshot).unwrap();
        assert_eq!(cred.user.mri, "8:orgid:abc-123");
        assert_eq!(cred.auth_token, bearer);
    }

    #[test]
    fn test_message_auth_normalizes_short_skypeid() {
        let mut snapshot = teams_snapshot(vec![]);
        snapshot.cookies = vec![
            teams_cookie(SKYPE_TOKEN_COOKIE, &skype_cookie_token("orgid:abc-123")),
            teams_cookie(AUTH_TOKEN_COOKIE, "Bearer%3Deyabc.def.ghi"),
        ];
        let cred = extract_message_auth(&snapshot).unwrap();
        assert_eq!(cred.user.mri, "8:orgid:abc-123");
        assert_eq!(cred.auth_token, "eyabc.def.ghi");
    }

    #[test]
    fn test_message_auth_identity_from_bearer() {
        let bearer = make_token(json!({"oid": OID}));
        let mut snapshot = teams_snapshot(vec![]);
        snapshot.cookies = vec![
            teams_cookie(SKYPE_TOKEN_COOKIE, "opaque-not-a-jwt"),
            teams_cookie(AUTH_TOKEN_COOKIE, &format!("Bearer%3D{}", bearer)),
        ];
        let cred = extract_message_auth(&snapshot).unwrap();
        assert_eq!(cred.user.mri, format!("8:orgid:{}", OID));
        assert_eq!(cred.skype_token, "opaque-not-a-jwt");
    }

    #[test]
    fn test_message_auth_requires_both_cookies() {
        let mut snapshot = teams_snapshot(vec![]);
        snapshot.cookies = vec![teams_cookie(
            SKYPE_TOKEN_COOKIE,
            &skype_cookie_token("8:orgid:abc-123"),
        )];
        assert!(extract_message_auth(&snapshot).is_none());

        snapshot.cookies = vec![teams_cookie(AUTH_TOKEN_COOKIE, "Bearer%3Da.b.c")];
        assert!(extract_message_auth(&snapshot).is_none());
    }

    #[test]
    fn test_message_auth_requires_identity() {
        let mut snapshot = teams_snapshot(vec![]);
        snapshot.cookies = vec![
            teams_cookie(SKYPE_TOKEN_COOKIE, "opaque"),
            teams_cookie(AUTH_TOKEN_COOKIE, "Bearer%3Dopaque"),
        ];
        assert!(extract_message_auth(&snapshot).is_none());
    }

    #[test]
    fn test_clean_auth_cookie() {
        assert_eq!(clean_auth_cookie("Bearer%3Dabc").as_deref(), Some("abc"));
        assert_eq!(
            clean_auth_cookie("Bearer%3Dabc%26Origin%3Dhttps%3A%2F%2Fteams.microsoft.com").as_deref(),
            Some("abc")
        );
        assert_eq!(clean_auth_cookie("abc").as_deref(), Some("abc"));
        assert!(clean_auth_cookie("Bearer%3D").is_none());
    }

    #[test]
    fn test_favourites_token_from_any_origin() {
        let mut snapshot = SessionSnapshot {
            cookies: vec![teams_cookie(SKYPE_TOKEN_COOKIE, "skype")],
            origins: vec![
                OriginStorage {
                    origin: "https://teams.microsoft.com".into(),
                    local_storage: vec![StorageEntry {
                        name: "tmp.https://chatsvcagg.teams.microsoft.com".into(),
                        value: json!({"secret": "temporary"}).to_string(),
                    }],
                },
                OriginStorage {
                    origin: "https://login.microsoftonline.com".into(),
                    local_storage: vec![
                        StorageEntry {
                            name: "x-accesstoken-https://chatsvcagg.teams.microsoft.com".into(),
                            value: "not json".into(),
                        },
                        StorageEntry {
                            name: "y-accesstoken-https://chatsvcagg.teams.microsoft.com".into(),
                            value: json!({"secret": "fav-token"}).to_string(),
                        },
                    ],
                },
            ],
        };
        let cred = extract_favourites_token(&snapshot).unwrap();
        assert_eq!(cred.favourites_token, "fav-token");
        assert_eq!(cred.skype_token, "skype");

        snapshot.cookies.clear();
        assert!(extract_favourites_token(&snapshot).is_none());
    }

    #[test]
    fn test_user_identity_first_decodable_wins() {
        let snapshot = teams_snapshot(vec![
            StorageEntry {
                name: "junk".into(),
                value: "{}".into(),
            },
            token_entry("no-name", "x", json!({"oid": "11111111-1111-1111-1111-111111111111"})),
            token_entry(
                "first",
                "x",
                json!({"oid": OID, "name": "First", "preferred_username": "first@x",
                       "given_name": "Fi", "family_name": "Rst"}),
            ),
            token_entry(
                "second",
                "x",
                json!({"oid": "22222222-2222-2222-2222-222222222222", "name": "Second"}),
            ),
        ]);
        let user = extract_user_identity(&snapshot).unwrap();
        assert_eq!(user.display_name, "First");
        assert_eq!(user.email, "first@x");
        assert_eq!(user.given_name.as_deref(), Some("Fi"));
        assert_eq!(user.surname.as_deref(), Some("Rst"));
        assert_eq!(user.mri, format!("8:orgid:{}", OID));
    }

    fn discovery(value: serde_json::Value) -> SessionSnapshot {
        teams_snapshot(vec![StorageEntry {
            name: "tmp.auth.v1.GLOBAL.DISCOVER-REGION-GTM".into(),
            value: value.to_string(),
        }])
    }

    #[test]
    fn test_region_partitioned() {
        let snapshot = discovery(json!({"item": {
            "middleTier": "https://teams.microsoft.com/api/mt/part/emea-03",
            "chatServiceAfd": "https://teams.microsoft.com/api/chatsvc/emea"
        }}));
        let region = extract_region_config(&snapshot).unwrap();
        assert_eq!(region.region, "emea");
        assert_eq!(region.partition.as_deref(), Some("03"));
        assert_eq!(region.region_partition, "emea-03");
    }

    #[test]
    fn test_region_plain() {
        let snapshot = discovery(json!({"item": {
            "middleTier": "https://teams.microsoft.com/api/mt/amer",
            "chatServiceAfd": "https://teams.microsoft.com/api/chatsvc/amer/"
        }}));
        let region = extract_region_config(&snapshot).unwrap();
        assert_eq!(region.region, "amer");
        assert!(region.partition.is_none());
        assert_eq!(region.region_partition, "amer");
        assert_eq!(
            region.chat_service_url.as_deref(),
            Some("https://teams.microsoft.com/api/chatsvc/amer/")
        );
    }

    #[test]
    fn test_region_prefers_partitioned_field_in_either_position() {
        let snapshot = discovery(json!({
            "middleTier": "https://teams.microsoft.com/api/mt/apac",
            "chatServiceAfd": "https://teams.microsoft.com/api/chatsvc/apac-02"
        }));
        let region = extract_region_config(&snapshot).unwrap();
        assert_eq!(region.region_partition, "apac-02");
    }

    #[test]
    fn test_region_absent_or_unmatched() {
        assert!(extract_region_config(&teams_snapshot(vec![])).is_none());
        let snapshot = discovery(json!({"item": {"middleTier": "https://example.com/nothing"}}));
        assert!(extract_region_config(&snapshot).is_none());
    }

    #[test]
    fn test_extract_dispatches_by_audience() {
        let snapshot = teams_snapshot(vec![
            search_entry(NOW + 100),
            chatsvcagg_entry(NOW + 100, Some(OID)),
        ]);
        assert_eq!(
            extract(&snapshot, Audience::Search, NOW).map(|c| c.audience()),
            Some(Audience::Search)
        );
        assert_eq!(
            extract(&snapshot, Audience::Chat, NOW).map(|c| c.audience()),
            Some(Audience::Chat)
        );
        assert!(extract(&snapshot, Audience::Messaging, NOW).is_none());
        assert!(extract(&snapshot, Audience::Favourites, NOW).is_none());
    }
}
