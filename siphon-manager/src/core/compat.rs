//! Agent compatibility, per SPEC_FULL.md §4.4: "A set of agents is
//! considered compatible iff their names are identical and, pairwise,
//! (product, version) match and their mechanism sets agree on
//! name+product+version."
//!
//! Version matching resolves the Open Question on patch laxity:
//! same major.minor is required, any patch is accepted, expressed with
//! `semver::VersionReq` rather than a hand-rolled comparison.

use std::collections::BTreeSet;

use siphon_protocol::session::AgentInfo;

/// Whether `candidate`'s version is compatible with `reference`'s:
/// same major.minor, patch always accepted.
pub fn versions_compatible(reference: &semver::Version, candidate: &semver::Version) -> bool {
    let req = semver::VersionReq::parse(&format!("~{}.{}", reference.major, reference.minor))
        .expect("tilde requirement built from numeric major.minor always parses");
    req.matches(candidate)
}

fn mechanism_sets_agree(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

/// Whether every agent in `agents` is mutually compatible with the
/// first: same name, same product, compatible version, and an
/// identical mechanism set. An empty or single-element slice is
/// trivially compatible.
pub fn agents_compatible(agents: &[&AgentInfo]) -> bool {
    let Some(reference) = agents.first() else {
        return true;
    };
    agents.iter().all(|agent| {
        agent.name == reference.name
            && agent.product == reference.product
            && versions_compatible(&reference.version, &agent.version)
            && mechanism_sets_agree(&reference.mechanisms, &agent.mechanisms)
    })
}
