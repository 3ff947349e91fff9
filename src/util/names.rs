//! Curated word lists for default container/pod names (`<adjective>-<animal>`).
//! A representative subset of the original implementation's longer lists.

pub const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "cosmic", "crimson", "dizzy", "eager", "earnest", "fierce",
    "gentle", "golden", "happy", "humble", "jolly", "keen", "lively", "lucid", "mellow", "nimble",
    "noble", "plucky", "quiet", "rapid", "sturdy", "swift", "tidy", "vivid", "wily", "witty",
    "zealous",
];

pub const ANIMALS: &[&str] = &[
    "otter", "falcon", "lynx", "heron", "badger", "marten", "gecko", "raven", "ibex", "tapir",
    "puffin", "weasel", "mongoose", "wombat", "jackal", "ocelot", "pangolin", "narwhal", "stoat",
    "dingo", "toucan", "caracal", "serval", "bison", "marmot", "kestrel", "quokka", "vole",
    "gazelle", "civet",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_lists_are_lowercase_and_nonempty() {
        assert!(!ADJECTIVES.is_empty());
        assert!(!ANIMALS.is_empty());
        for w in ADJECTIVES.iter().chain(ANIMALS.iter()) {
            assert!(w.chars().all(|c| c.is_ascii_lowercase()));
        }
    }
}
