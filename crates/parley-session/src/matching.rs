//! Matching a spoken transfer target against configured destination labels.

use parley_types::TransferDestination;

/// Groups of interchangeable first names.
const NAME_VARIANTS: &[&[&str]] = &[
    &["robert", "rob", "bob", "bobby", "robbie"],
    &["richard", "rick", "ricky", "rich", "dick"],
    &["william", "will", "bill", "billy", "liam"],
    &["michael", "mike", "mikey", "mick"],
    &["james", "jim", "jimmy", "jamie"],
    &["john", "johnny", "jack"],
    &["jonathan", "jon", "jonny"],
    &["elizabeth", "liz", "lizzy", "beth", "betty", "eliza"],
    &["katherine", "catherine", "kate", "katie", "kathy", "cathy", "kat"],
    &["jennifer", "jen", "jenny"],
    &["christopher", "chris"],
    &["christine", "christina", "chris", "tina"],
    &["daniel", "dan", "danny"],
    &["david", "dave", "davey"],
    &["joseph", "joe", "joey"],
    &["thomas", "tom", "tommy"],
    &["anthony", "tony"],
    &["edward", "ed", "eddie", "ted"],
    &["margaret", "maggie", "meg", "peggy"],
    &["patricia", "pat", "patty", "trish"],
    &["patrick", "pat", "paddy"],
    &["samuel", "sam", "sammy"],
    &["samantha", "sam", "sammy"],
    &["alexander", "alex", "xander"],
    &["alexandra", "alex", "sasha"],
    &["nicholas", "nick", "nicky"],
    &["stephen", "steven", "steve"],
    &["benjamin", "ben", "benny"],
    &["matthew", "matt"],
    &["andrew", "andy", "drew"],
    &["susan", "sue", "suzy"],
    &["deborah", "deb", "debbie"],
    &["rebecca", "becky", "becca"],
    &["victoria", "vicky", "tori"],
    &["timothy", "tim", "timmy"],
    &["gregory", "greg"],
    &["kenneth", "ken", "kenny"],
    &["ronald", "ron", "ronnie"],
    &["donald", "don", "donnie"],
];

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty())
}

/// Whether `needle`'s words appear consecutively among `haystack`'s words.
fn contains_words(haystack: &str, needle: &str) -> bool {
    let hay: Vec<&str> = tokens(haystack).collect();
    let needle: Vec<&str> = tokens(needle).collect();
    !needle.is_empty() && hay.windows(needle.len()).any(|w| w == needle.as_slice())
}

fn are_variants(a: &str, b: &str) -> bool {
    NAME_VARIANTS
        .iter()
        .any(|group| group.contains(&a) && group.contains(&b))
}

/// Finds the destination for a spoken target.
///
/// Tries, across all destinations, an exact case-insensitive label match,
/// then containment in either direction, then a nickname match on any word.
/// Among containment hits, whole-word matches rank above matches inside a
/// word, and longer labels above shorter ones. Remaining ties go to the
/// destination listed first.
pub fn match_destination<'a>(
    spoken: &str,
    destinations: &'a [TransferDestination],
) -> Option<&'a TransferDestination> {
    let wanted = normalize(spoken);
    if wanted.is_empty() {
        return None;
    }

    if let Some(d) = destinations.iter().find(|d| normalize(&d.label) == wanted) {
        return Some(d);
    }

    let mut best: Option<((bool, usize), &TransferDestination)> = None;
    for d in destinations {
        let label = normalize(&d.label);
        if label.is_empty() || !(label.contains(&wanted) || wanted.contains(&label)) {
            continue;
        }
        let rank = (
            contains_words(&label, &wanted) || contains_words(&wanted, &label),
            label.len(),
        );
        if best.map_or(true, |(top, _)| rank > top) {
            best = Some((rank, d));
        }
    }
    if let Some((_, d)) = best {
        return Some(d);
    }

    destinations.iter().find(|d| {
        let label = normalize(&d.label);
        tokens(&wanted).any(|w| tokens(&label).any(|l| are_variants(w, l)))
    })
}

/// Comma-separated labels, for telling the caller what is available.
pub fn available_labels(destinations: &[TransferDestination]) -> String {
    destinations
        .iter()
        .map(|d| d.label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
