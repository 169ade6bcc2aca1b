//! Built-in template pools and the library that holds them.

use std::collections::HashMap;

use super::{Template, TemplateCategory};
use crate::agents::ScaffoldingType;
use crate::zpd::Intensity;

/// Template pools keyed by (scaffolding type, category).
///
/// Pool order is significant: the selector breaks score ties by lowest index.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    pools: HashMap<(ScaffoldingType, TemplateCategory), Vec<Template>>,
}

impl TemplateLibrary {
    /// Library with the built-in pools for every agent, the control agent
    /// included.
    pub fn new() -> Self {
        let mut library = Self::default();
        library.register_builtins();
        library
    }

    /// Library without any templates.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a template to a pool.
    pub fn register(
        &mut self,
        kind: ScaffoldingType,
        category: TemplateCategory,
        template: Template,
    ) {
        self.pools.entry((kind, category)).or_default().push(template);
    }

    /// Templates in a pool, empty if none were registered.
    pub fn pool(&self, kind: ScaffoldingType, category: TemplateCategory) -> &[Template] {
        self.pools
            .get(&(kind, category))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn register_builtins(&mut self) {
        for kind in ScaffoldingType::ROSTER {
            for (category, templates) in builtin_pools(kind) {
                for template in templates {
                    self.register(kind, category, template);
                }
            }
        }
    }
}

fn builtin_pools(kind: ScaffoldingType) -> Vec<(TemplateCategory, Vec<Template>)> {
    use Intensity::{High, Low, Medium};
    use TemplateCategory::{Conclusion, FollowUp, InitialPrompt};

    match kind {
        ScaffoldingType::Conceptual => vec![
            (
                InitialPrompt,
                vec![
                    Template::open("Let's look at the big picture of your map. Which concepts are essential for this topic, and which ones are still missing?").with_intensity(High),
                    Template::open("Think about the core ideas of this topic. Which concepts would an expert expect to see in your map?").with_intensity(Medium),
                    Template::open("What key concepts would you add to strengthen your map?").with_intensity(Low),
                    Template::specific("Your map has {node_count} concepts. Start with {concept}: which other concepts is it directly related to, and how would you label those links?").with_intensity(High),
                    Template::specific("How would you describe the relationship between {concept} and {concept_2}?").with_intensity(Medium),
                    Template::specific("What does {recent_concept} mean in this topic, in your own words?").with_intensity(Low),
                    Template::specific("{isolated_concept} isn't connected to anything yet. Where does it belong in your map?"),
                ],
            ),
            (
                FollowUp,
                vec![
                    Template::open("Can you say more about what that idea means to you?"),
                    Template::open("Which concept in your map feels most central right now, and why?"),
                    Template::specific("How is {concept} different from {concept_2}?"),
                    Template::specific("Is {concept} an example, a cause, or a part of something else in your map?"),
                    Template::specific("You connected {relationship}. What does that link mean to you?"),
                    Template::specific("Which concept would you add next to explain {recent_concept} better?"),
                    Template::open("Are there concepts in your map that overlap or could be merged?"),
                ],
            ),
            (
                Conclusion,
                vec![
                    Template::specific("Good work in this round. Your map now holds {node_count} concepts and {edge_count} relationships, and you've thought carefully about how the ideas relate."),
                    Template::open("Thanks for working through the concepts in this round. Keep your map as it is; we'll build on it next."),
                ],
            ),
        ],
        ScaffoldingType::Procedural => vec![
            (
                InitialPrompt,
                vec![
                    Template::open("Let's take this step by step. First, add one concept you're sure belongs in the map, then connect it to an existing one.").with_intensity(High),
                    Template::open("What is the next step you want to take with your map?").with_intensity(Medium),
                    Template::open("How will you continue building your map in this round?").with_intensity(Low),
                    Template::specific("Your map has {node_count} concepts and {edge_count} relationships. A good first step: connect {isolated_concept} to a related concept.").with_intensity(High),
                    Template::specific("Try adding a labelled relationship that starts at {concept}. Where would it point?").with_intensity(Medium),
                    Template::specific("Which step would improve the part of your map around {recent_concept}?").with_intensity(Low),
                ],
            ),
            (
                FollowUp,
                vec![
                    Template::open("What will you add or change next?"),
                    Template::open("Which relationship in your map still needs a clear label?"),
                    Template::specific("What would be a good next step from {concept}?"),
                    Template::specific("Could you add one more relationship for {recent_concept}?"),
                    Template::specific("{isolated_concept} is not linked yet. Which concept should it connect to?"),
                    Template::specific("Check the link {relationship}. Does its label describe the connection precisely?"),
                    Template::open("Have you checked that every concept has at least one connection?"),
                ],
            ),
            (
                Conclusion,
                vec![
                    Template::specific("Nice progress. Step by step you've reached {node_count} concepts and {edge_count} relationships in this round."),
                    Template::open("That's the end of this round. Every step you took is saved in your map."),
                ],
            ),
        ],
        ScaffoldingType::Strategic => vec![
            (
                InitialPrompt,
                vec![
                    Template::open("Before you continue, let's plan. Which area of the topic will you focus on first, and which one after that?").with_intensity(High),
                    Template::open("What strategy will you use to make your map more complete?").with_intensity(Medium),
                    Template::open("What's your plan for this round?").with_intensity(Low),
                    Template::specific("Your map has {node_count} concepts. Consider grouping them around a few central ideas such as {concept}. What groups do you see?").with_intensity(High),
                    Template::specific("Which part of your map, perhaps around {concept}, would benefit most from more detail?").with_intensity(Medium),
                    Template::specific("How does {recent_concept} fit into your overall plan for the map?").with_intensity(Low),
                ],
            ),
            (
                FollowUp,
                vec![
                    Template::open("Which part of the topic is least covered in your map so far?"),
                    Template::open("If you had only five more minutes, what would you prioritize?"),
                    Template::specific("What would change if you started from {concept_2} instead of {concept}?"),
                    Template::specific("Is {concept} a central idea or a detail in your map?"),
                    Template::specific("How does the link {relationship} fit into your overall structure?"),
                    Template::open("How could you check whether your map covers the topic from more than one perspective?"),
                    Template::specific("Which cluster should {isolated_concept} belong to?"),
                ],
            ),
            (
                Conclusion,
                vec![
                    Template::specific("Well planned. Your map has grown to {node_count} concepts and {edge_count} relationships with a clearer structure."),
                    Template::open("This round is complete. Keep your plan in mind for the next one."),
                ],
            ),
        ],
        ScaffoldingType::Metacognitive => vec![
            (
                InitialPrompt,
                vec![
                    Template::open("Take a moment to look at your map. Which parts do you feel confident about, and where are you unsure?").with_intensity(High),
                    Template::open("How has your understanding of the topic changed since you started?").with_intensity(Medium),
                    Template::open("How would you rate your map so far, and why?").with_intensity(Low),
                    Template::specific("You have {node_count} concepts and {edge_count} relationships. How sure are you about the links around {concept}?").with_intensity(High),
                    Template::specific("What made you add {recent_concept}? How does it change your picture of the topic?").with_intensity(Medium),
                    Template::specific("How would you explain {concept} to someone new to the topic?").with_intensity(Low),
                ],
            ),
            (
                FollowUp,
                vec![
                    Template::open("How did you decide on that?"),
                    Template::open("What would you do differently if you started the map again?"),
                    Template::specific("How confident are you about {relationship}, and what would make you more certain?"),
                    Template::specific("What do you know about {concept} that isn't in your map yet?"),
                    Template::specific("Did adding {recent_concept} change how you see the rest of the map?"),
                    Template::open("Which part of your thinking was hardest to put into the map?"),
                    Template::specific("How could you check whether {concept} and {concept_2} are really connected?"),
                ],
            ),
            (
                Conclusion,
                vec![
                    Template::specific("Thanks for reflecting so openly. Your map now shows {node_count} concepts and {edge_count} relationships; notice how your thinking has moved."),
                    Template::open("That's it for this round. Take your reflections with you into the next one."),
                ],
            ),
        ],
        // acknowledgements only: no questions, hints or content feedback
        ScaffoldingType::Neutral => vec![
            (
                InitialPrompt,
                vec![
                    Template::open("Please continue building your concept map according to the task description. Add concepts and relationships as you see fit."),
                    Template::open("Keep developing your concept map based on the provided materials. Work at your own pace."),
                    Template::specific("Your concept map currently shows {node_count} concepts and {edge_count} relationships. Keep going with your work."),
                ],
            ),
            (
                FollowUp,
                vec![
                    Template::open("Thanks for the update. Please continue with your concept mapping task as described."),
                    Template::specific("I see you're working with {concept} and {concept_2}. Keep building your map according to the task requirements."),
                    Template::specific("I notice your map has {node_count} concepts so far. Please continue working on it as described in the instructions."),
                    Template::specific("I can see your progress with {recent_concept}. Continue working on the task as described."),
                    Template::open("Please continue with your concept map development."),
                ],
            ),
            (
                Conclusion,
                vec![
                    Template::specific("This round is complete. Your map has {node_count} concepts and {edge_count} relationships."),
                    Template::open("This round is complete. Please continue with the task in the next round."),
                ],
            ),
        ],
    }
}
